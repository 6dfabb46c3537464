//! # session 模块说明
//!
//! ## 核心意图（Why）
//! - 建模转发会话的持久化描述符与运行时状态快照，二者分离：描述符落盘
//!   且除 `paused` 外不可变，状态只存在于内存并随控制器运行演进；
//! - 状态枚举刻画"断开 → 连接源 → 连接目的 → 转发中"的推进次序，供
//!   管理器的 `list` 快照与外部观测使用。
//!
//! ## 行为契约（What）
//! - 计数器不变式：`open_connections <= total_connections`，且
//!   `total_connections` 单调不减；
//! - 状态字段仅在会话未暂停时有意义；
//! - 描述符在持久化与装配前必须通过 [`Session::validate`]。

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::configuration::Configuration;
use crate::error::SessionError;
use crate::identifier;
use crate::url::Url;
use crate::version::Version;

/// 会话运行状态。
///
/// # 教案式说明
/// - **契约 (What)**：线上数值 0–3 固定；状态推进由控制器的运行循环
///   驱动，不设逆向跃迁（断线直接回到 `Disconnected` 重新开始）；
/// - **风险 (Trade-offs)**：枚举未加 `#[non_exhaustive]`——状态集合是
///   协议的一部分，新增状态本身就是破坏性变更。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Status {
    /// 两端均未连接。
    #[default]
    Disconnected,
    /// 正在连接源端点。
    ConnectingSource,
    /// 正在连接目的端点。
    ConnectingDestination,
    /// 双端就绪，转发连接中。
    ForwardingConnections,
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        match status {
            Status::Disconnected => 0,
            Status::ConnectingSource => 1,
            Status::ConnectingDestination => 2,
            Status::ForwardingConnections => 3,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Disconnected),
            1 => Ok(Status::ConnectingSource),
            2 => Ok(Status::ConnectingDestination),
            3 => Ok(Status::ForwardingConnections),
            _ => Err(SessionError::InvalidStatus { value }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Disconnected => "Waiting to connect",
            Status::ConnectingSource => "Connecting to source",
            Status::ConnectingDestination => "Connecting to destination",
            Status::ForwardingConnections => "Forwarding connections",
        };
        f.write_str(text)
    }
}

/// 转发会话的持久化描述符。
///
/// # 教案式说明
/// - **意图 (Why)**：一次 `create` 的全部输入在这里固化，管理器重启后
///   凭它重建控制器；
/// - **契约 (What)**：
///   - `identifier`：`fwds_` 前缀标识符，同时是会话文件名；
///   - `version`：会话协议版本，决定配置默认值；
///   - `configuration` / `configuration_source` /
///     `configuration_destination`：全局与端侧配置，装配时按
///     [`Configuration::merge`] 合并；
///   - `paused`：唯一可变字段，随暂停/恢复重写到磁盘；
/// - **风险 (Trade-offs)**：`creation_time` 使用系统壁钟，仅用于排序与
///   展示，不参与一致性判断。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// 会话标识符。
    pub identifier: String,
    /// 会话协议版本。
    pub version: Version,
    /// 创建时刻。
    pub creation_time: SystemTime,
    /// 创建方软件版本。
    pub creating_version: String,
    /// 源端点（监听方）URL。
    pub source: Url,
    /// 目的端点（拨号方）URL。
    pub destination: Url,
    /// 全局配置。
    pub configuration: Configuration,
    /// 源端点专属配置。
    pub configuration_source: Configuration,
    /// 目的端点专属配置。
    pub configuration_destination: Configuration,
    /// 可选的人类可读名称。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 标签映射。
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// 暂停标志。
    #[serde(default)]
    pub paused: bool,
}

impl Session {
    /// 校验描述符的全部不变式。
    pub fn validate(&self) -> Result<(), SessionError> {
        if !identifier::is_valid(&self.identifier) {
            return Err(SessionError::InvalidIdentifier {
                identifier: self.identifier.clone(),
            });
        }
        self.source
            .forwarding_address()
            .map_err(SessionError::InvalidSource)?;
        self.destination
            .forwarding_address()
            .map_err(SessionError::InvalidDestination)?;
        self.configuration.validate()?;
        self.configuration_source.validate()?;
        self.configuration_destination.validate()?;
        Ok(())
    }

    /// 源端点的生效配置（全局 + 源侧合并）。
    pub fn effective_source_configuration(&self) -> Configuration {
        Configuration::merge(&self.configuration, &self.configuration_source)
    }

    /// 目的端点的生效配置（全局 + 目的侧合并）。
    pub fn effective_destination_configuration(&self) -> Configuration {
        Configuration::merge(&self.configuration, &self.configuration_destination)
    }
}

/// 会话运行状态快照。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// 描述符快照。
    pub session: Session,
    /// 当前运行状态。
    pub status: Status,
    /// 源端点是否已连接。
    pub source_connected: bool,
    /// 目的端点是否已连接。
    pub destination_connected: bool,
    /// 最近一次非空错误的描述，空串表示无。
    pub last_error: String,
    /// 当前存活的转发连接数。
    pub open_connections: u64,
    /// 历史成功配对的连接总数。
    pub total_connections: u64,
}

impl State {
    /// 以断开状态初始化快照。
    pub fn new(session: Session) -> State {
        State {
            session,
            status: Status::Disconnected,
            source_connected: false,
            destination_connected: false,
            last_error: String::new(),
            open_connections: 0,
            total_connections: 0,
        }
    }
}

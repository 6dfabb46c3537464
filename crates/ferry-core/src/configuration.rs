//! # configuration 模块说明
//!
//! ## 核心意图（Why）
//! - 建模 Unix 域套接字的四项策略字段（覆盖、属主、属组、权限位），并
//!   提供"全局配置 + 端侧配置"的三值合并；
//! - 把文本/数值两种外部表示的解析失败都收敛为
//!   [`ConfigurationError`]，避免半合法配置流入监听器创建路径。
//!
//! ## 行为契约（What）
//! - 合并规则逐字段执行："高优先级值胜出，除非它是该字段的零值/默认
//!   值"；
//! - 合并满足幂等律：`merge(cfg, default) == cfg == merge(default, cfg)`；
//! - 字段为默认值时的实际语义由 [`Version`](crate::version::Version) 的
//!   版本默认值决定，本模块不做隐式替换。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// 遇到残留 Unix 套接字文件时的处置策略。
///
/// # 教案式说明
/// - **意图 (Why)**：监听器绑定失败且冲突来自已存在的套接字路径时，由
///   本策略决定是放弃还是删除后重试；
/// - **契约 (What)**：线上数值 0/1/2 固定；文本解析只接受区分大小写的
///   `"leave"` 与 `"overwrite"`，`Default` 没有文本形态；
/// - **风险 (Trade-offs)**：`Overwrite` 会无条件删除冲突路径，调用方需
///   确认该路径确实归本进程管辖。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SocketOverwriteMode {
    /// 未显式指定，使用版本默认值。
    #[default]
    Default,
    /// 保留冲突路径，使监听器创建失败。
    Leave,
    /// 删除冲突路径后重试绑定。
    Overwrite,
}

impl SocketOverwriteMode {
    /// 是否为未指定状态。
    pub fn is_default(self) -> bool {
        matches!(self, SocketOverwriteMode::Default)
    }
}

impl From<SocketOverwriteMode> for u8 {
    fn from(mode: SocketOverwriteMode) -> u8 {
        match mode {
            SocketOverwriteMode::Default => 0,
            SocketOverwriteMode::Leave => 1,
            SocketOverwriteMode::Overwrite => 2,
        }
    }
}

impl TryFrom<u8> for SocketOverwriteMode {
    type Error = ConfigurationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SocketOverwriteMode::Default),
            1 => Ok(SocketOverwriteMode::Leave),
            2 => Ok(SocketOverwriteMode::Overwrite),
            _ => Err(ConfigurationError::InvalidSocketOverwriteMode { value }),
        }
    }
}

impl FromStr for SocketOverwriteMode {
    type Err = ConfigurationError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "leave" => Ok(SocketOverwriteMode::Leave),
            "overwrite" => Ok(SocketOverwriteMode::Overwrite),
            _ => Err(ConfigurationError::UnknownSocketOverwriteMode {
                text: text.to_owned(),
            }),
        }
    }
}

impl fmt::Display for SocketOverwriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SocketOverwriteMode::Default => "default",
            SocketOverwriteMode::Leave => "leave",
            SocketOverwriteMode::Overwrite => "overwrite",
        };
        f.write_str(text)
    }
}

/// 转发端点的套接字策略配置。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `socket_overwrite_mode`：残留套接字处置策略；
///   - `socket_owner` / `socket_group`：属主/属组说明符，空串表示继承
///     进程身份；说明符可为名称或十进制数值 id；
///   - `socket_permission_mode`：权限位，`0` 表示采用版本默认；
/// - **前置条件**：进入监听器创建路径前必须通过 [`validate`](Self::validate)；
/// - **风险 (Trade-offs)**：属主/属组说明符到内核 id 的解析发生在应用
///   时刻而非校验时刻，名称在两个时刻之间被删除会导致监听器创建失败。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// 残留套接字处置策略。
    pub socket_overwrite_mode: SocketOverwriteMode,
    /// 套接字属主说明符，空串表示继承。
    pub socket_owner: String,
    /// 套接字属组说明符，空串表示继承。
    pub socket_group: String,
    /// 套接字权限位，`0` 表示版本默认。
    pub socket_permission_mode: u32,
}

impl Configuration {
    /// 校验配置字段。
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.socket_permission_mode & !0o777 != 0 {
            return Err(ConfigurationError::InvalidSocketPermissionMode {
                mode: self.socket_permission_mode,
            });
        }
        Ok(())
    }

    /// 按"高优先级非默认值胜出"合并两份配置。
    ///
    /// # 教案式注释
    /// - **意图 (Why)**：端侧配置覆盖全局配置，但显式的"未指定"不应
    ///   抹掉全局已有的取值；
    /// - **契约 (What)**：`lower` 为全局配置，`higher` 为端侧配置；返回
    ///   新实例，入参不被修改；
    /// - **执行 (How)**：逐字段判断 `higher` 是否为零值/默认值，是则
    ///   回落到 `lower`。
    pub fn merge(lower: &Configuration, higher: &Configuration) -> Configuration {
        Configuration {
            socket_overwrite_mode: if higher.socket_overwrite_mode.is_default() {
                lower.socket_overwrite_mode
            } else {
                higher.socket_overwrite_mode
            },
            socket_owner: if higher.socket_owner.is_empty() {
                lower.socket_owner.clone()
            } else {
                higher.socket_owner.clone()
            },
            socket_group: if higher.socket_group.is_empty() {
                lower.socket_group.clone()
            } else {
                higher.socket_group.clone()
            },
            socket_permission_mode: if higher.socket_permission_mode == 0 {
                lower.socket_permission_mode
            } else {
                higher.socket_permission_mode
            },
        }
    }
}

//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义转发核心各层共享的错误语义，确保配置、地址、端点与会话
//!   校验失败时携带稳定且可读的上下文；
//! - 区分"校验类错误"（不可恢复，向调用方直接返回）与"传输类错误"
//!   （触发控制器的断线重连循环）。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 [`thiserror::Error`] 以兼容 `std::error::Error`；
//! - [`TransportError`] 额外要求 `Clone`，因为它经由 watch 通道广播给
//!   多个观察者；
//! - 端点实现内部的一次性 IO 错误通过 [`EndpointError::Open`] 原样透传。

use std::sync::Arc;

use thiserror::Error;

/// 配置字段校验与反序列化错误。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConfigurationError {
    /// 文本形式的套接字覆盖模式无法识别。
    ///
    /// - **契约 (What)**：仅接受区分大小写的 `"leave"` 与 `"overwrite"`；
    ///   其余文本（包括 `"default"`）一律拒绝。
    #[error("unknown socket overwrite mode: {text:?}")]
    UnknownSocketOverwriteMode { text: String },

    /// 数值形式的套接字覆盖模式越界。
    #[error("invalid socket overwrite mode value: {value}")]
    InvalidSocketOverwriteMode { value: u8 },

    /// 套接字权限位超出 `0o777` 可表达范围。
    ///
    /// - **意图 (Why)**：阻止经由转发配置通道设置 set-uid/set-gid/sticky
    ///   等敏感位。
    #[error("socket permission mode {mode:#o} exceeds permission bits")]
    InvalidSocketPermissionMode { mode: u32 },
}

/// 转发地址（`<transport>:<address>`）文法错误。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AddressError {
    /// 路径缺少 `transport:address` 分隔符。
    #[error("forwarding address missing transport separator: {path:?}")]
    MissingSeparator { path: String },

    /// 传输标签不在允许集合内。
    #[error("unknown forwarding transport: {transport:?}")]
    UnknownTransport { transport: String },

    /// 地址部分为空。
    #[error("forwarding address is empty")]
    EmptyAddress,

    /// 本地 `unix:` 端点要求绝对路径。
    #[error("unix socket path must be absolute: {path:?}")]
    RelativeUnixPath { path: String },
}

/// 会话描述符与状态载荷的校验错误。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SessionError {
    /// 会话标识符不满足前缀/字母表约束。
    #[error("invalid session identifier: {identifier:?}")]
    InvalidIdentifier { identifier: String },

    /// 会话协议版本不受支持。
    #[error("unsupported session version: {version}")]
    UnsupportedVersion { version: u32 },

    /// 会话状态数值越界。
    #[error("invalid session status value: {value}")]
    InvalidStatus { value: u8 },

    /// 源 URL 不是合法的转发 URL。
    #[error("invalid source URL")]
    InvalidSource(#[source] AddressError),

    /// 目的 URL 不是合法的转发 URL。
    #[error("invalid destination URL")]
    InvalidDestination(#[source] AddressError),

    /// 三份配置（全局/源/目的）之一未通过校验。
    #[error("invalid configuration")]
    InvalidConfiguration(#[from] ConfigurationError),
}

/// 端点单次操作（open/accept/dial）与监听器初始化错误。
///
/// # 教案式说明
/// - **意图 (Why)**：区分"对当前连接致命"与"对整个端点致命"两档语义，
///   供控制器决定是跳过本条连接还是进入重连循环；
/// - **契约 (What)**：
///   - [`EndpointError::Shutdown`] 是哨兵值：`shutdown()` 之后的所有
///     `open()` 必须返回它；
///   - [`EndpointError::ListenerInit`] 以字符串保存根因，使惰性监听器
///     可以在每次 `open()` 上重复返回同一失败；
/// - **风险 (Trade-offs)**：`Open` 变体持有 [`std::io::Error`]，因此整个
///   枚举不实现 `Clone`；需要广播的故障请改用 [`TransportError`]。
#[derive(Debug, Error)]
pub enum EndpointError {
    /// 端点已关闭，不再受理任何打开请求。
    #[error("endpoint has been shut down")]
    Shutdown,

    /// 打开操作被取消令牌中止。
    #[error("open operation cancelled")]
    Cancelled,

    /// 请求的传输在当前平台不可用（如非 Windows 上的 `npipe`）。
    #[error("transport {transport:?} is not supported on this platform")]
    Unsupported { transport: String },

    /// 底层监听器创建或配置失败。
    #[error("failed to initialize listener: {message}")]
    ListenerInit { message: String },

    /// 单次 open/accept/dial 的 IO 失败。
    #[error(transparent)]
    Open(#[from] std::io::Error),

    /// 复用器层故障（远端端点专用）。
    #[error("multiplexer failure: {message}")]
    Multiplexer { message: String },

    /// 转发地址在装配阶段解析失败。
    #[error(transparent)]
    Address(#[from] AddressError),
}

impl EndpointError {
    /// 以消息文本构造监听器初始化错误。
    pub fn listener_init(message: impl Into<String>) -> Self {
        EndpointError::ListenerInit {
            message: message.into(),
        }
    }
}

/// 远端端点底层传输的故障通知。
///
/// - **意图 (Why)**：经 watch 通道广播给控制器的观察任务，因此必须
///   `Clone` 且不持有非共享资源；
/// - **契约 (What)**：`message` 为根因的人类可读描述，至多投递一次。
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: Arc<str>,
}

impl TransportError {
    /// 以消息文本构造传输故障。
    pub fn new(message: impl AsRef<str>) -> Self {
        TransportError {
            message: Arc::from(message.as_ref()),
        }
    }

    /// 读取故障描述。
    pub fn message(&self) -> &str {
        &self.message
    }
}

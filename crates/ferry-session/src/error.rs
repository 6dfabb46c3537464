//! 会话编排层错误域。

use ferry_core::{AddressError, EndpointError};
use thiserror::Error;

/// 端点装配（经协议处理器）错误。
#[derive(Debug, Error)]
pub enum ConnectError {
    /// URL 协议没有对应的处理器。
    #[error("no handler registered for protocol: {protocol}")]
    UnknownProtocol { protocol: String },

    /// 本地 URL 不允许携带环境变量或参数。
    #[error("local URLs may not carry environment variables or parameters")]
    LocalUrlExtras,

    /// 端点地址文法错误。
    #[error(transparent)]
    Address(#[from] AddressError),

    /// 端点构造失败。
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// 装配被取消令牌中止。
    #[error("endpoint connection cancelled")]
    Cancelled,

    /// 远端处理器（承载拨号或握手）失败。
    #[error("remote endpoint connection failed: {message}")]
    Remote { message: String },
}

/// 管理器与控制器操作错误。
#[derive(Debug, Error)]
pub enum ManagerError {
    /// 会话描述符校验失败。
    #[error(transparent)]
    Session(#[from] ferry_core::SessionError),

    /// 会话目录读写失败。
    #[error("session storage failure")]
    Store(#[source] std::io::Error),

    /// 状态跟踪已终止（管理器正在停机）。
    #[error("state tracking terminated")]
    Terminated,

    /// 等待/操作被取消令牌中止。
    #[error("operation cancelled")]
    Cancelled,

    /// 选择规格没有匹配到任何会话。
    #[error("no sessions matched specification: {specification:?}")]
    UnmatchedSpecification { specification: String },
}

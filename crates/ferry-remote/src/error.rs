//! 远端端点初始化与服务错误域。

use ferry_core::{AddressError, ConfigurationError};
use ferry_mux::MuxError;
use thiserror::Error;

/// 初始化握手与服务端装配错误。
///
/// # 教案式说明
/// - **意图 (Why)**：把"协议层拒绝"（版本、配置、地址不合法）与
///   "装配失败"（本地端点创建失败）、"传输层失败"（复用器/IO）分开，
///   服务端把前两类以文本形式写回响应，客户端把
///   [`HandshakeError::Rejected`] 呈现为远端初始化失败；
/// - **契约 (What)**：所有变体都携带足以定位根因的上下文；编码错误
///   统一折叠为 [`HandshakeError::Encoding`]。
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// 请求的协议版本不受支持。
    #[error("unsupported forwarding protocol version: {version}")]
    UnsupportedVersion { version: u32 },

    /// 请求携带的配置未通过校验。
    #[error("invalid configuration")]
    InvalidConfiguration(#[source] ConfigurationError),

    /// 请求的传输标签为空或不在允许集合内。
    #[error("invalid transport")]
    InvalidTransport(#[source] AddressError),

    /// 请求的端点地址为空。
    #[error("empty forwarding address")]
    EmptyAddress,

    /// 初始化消息超过长度上限。
    #[error("initialization message too large ({length} bytes)")]
    MessageTooLarge { length: usize },

    /// 初始化消息编码/解码失败。
    #[error("invalid initialization message encoding")]
    Encoding(#[from] bincode::Error),

    /// 初始化流上的 IO 失败。
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 复用器在初始化期间失败。
    #[error(transparent)]
    Mux(#[from] MuxError),

    /// 远端以错误文本拒绝了初始化。
    #[error("remote endpoint rejected initialization: {message}")]
    Rejected { message: String },

    /// 服务端按请求装配本地端点失败。
    #[error("unable to create endpoint: {message}")]
    Endpoint { message: String },
}

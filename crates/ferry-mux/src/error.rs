//! 复用器错误域。
//!
//! 错误需要经 `internal_error()` 被多个观察者读取，因此全部变体以可
//! 克隆的消息文本承载根因。

use thiserror::Error;

/// 复用器生命周期与协议错误。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MuxError {
    /// 复用器已整体关闭（主动 shutdown 的哨兵值）。
    #[error("multiplexer closed")]
    Closed,

    /// 底层传输读写失败。
    #[error("multiplexer transport failure: {message}")]
    Transport { message: String },

    /// 对端发送了无法解析的帧。
    #[error("multiplexer protocol violation: {message}")]
    Protocol { message: String },
}

impl MuxError {
    /// 以 IO 错误构造传输失败。
    pub fn transport(error: &std::io::Error) -> MuxError {
        MuxError::Transport {
            message: error.to_string(),
        }
    }

    /// 以描述文本构造协议违例。
    pub fn protocol(message: impl Into<String>) -> MuxError {
        MuxError::Protocol {
            message: message.into(),
        }
    }
}

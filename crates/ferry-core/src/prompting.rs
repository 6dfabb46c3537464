//! 面向用户的消息投递接口。
//!
//! 核心只会发送单向状态消息；交互式提问由外部协作者实现并注入。

/// 状态消息的接收方。
pub trait Prompter: Send + Sync {
    /// 投递一条状态消息。
    fn message(&self, message: &str);
}

/// 丢弃所有消息的空实现，供无人值守场景与测试使用。
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentPrompter;

impl Prompter for SilentPrompter {
    fn message(&self, _message: &str) {}
}

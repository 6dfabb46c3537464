//! # endpoint 模块说明
//!
//! ## 核心意图（Why）
//! - 以能力集 {open, transport_errors, shutdown} 建模转发端点，使会话
//!   控制器对"本地监听 / 本地拨号 / 远端复用"三类实现保持无差别调度；
//! - 传输层故障通过只读通道异步送达，而不是在 `open()` 的返回值里混杂
//!   两种生命周期不同的错误。
//!
//! ## 行为契约（What）
//! - `open()`：监听端点阻塞到有新客户端接入，拨号端点立即发起出站连接；
//! - `transport_errors()`：返回至多观察到一个 [`TransportError`] 的接收
//!   端；本地端点的通道永远不会出现值；
//! - `shutdown()`：幂等释放全部资源，并使未完成的 `open()` 尽快返回。
//!
//! ## 风险提示（Trade-offs）
//! - 契约不约束 `open()` 的并发次序，控制器应串行驱动接受循环；
//! - 故障通道基于 `tokio::sync::watch`，只保留最新值——这正好与"至多
//!   一次"的投递语义吻合，但不要把它当成通用事件队列使用。

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::error::{EndpointError, TransportError};

/// 转发连接的字节流能力集。
///
/// 对所有满足约束的类型做空 impl，使 `Box<dyn Stream>` 可以承载
/// `TcpStream`、`UnixStream`、复用器流以及测试用的内存双工管道。
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// 一条已建立的转发连接。
pub type Connection = Box<dyn Stream>;

/// 传输故障通道的发送端，由端点实现持有。
///
/// - **契约 (What)**：[`report`](Self::report) 只在第一次调用时写入值，
///   后续调用被忽略并返回 `false`；
/// - **风险 (Trade-offs)**：发送端被丢弃后接收端不再醒来，观察者通过
///   [`TransportErrors::failed`] 的"悬置"语义兜底。
#[derive(Debug)]
pub struct TransportErrorReporter {
    tx: watch::Sender<Option<TransportError>>,
}

impl TransportErrorReporter {
    /// 投递首个传输故障；重复投递被忽略。
    pub fn report(&self, error: TransportError) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = Some(error);
                true
            }
        })
    }
}

/// 传输故障通道的只读端。
#[derive(Clone, Debug)]
pub struct TransportErrors {
    rx: watch::Receiver<Option<TransportError>>,
}

impl TransportErrors {
    /// 等待首个传输故障。
    ///
    /// # 教案式注释
    /// - **意图 (Why)**：控制器的观察任务用它与停机信号一起 `select!`；
    /// - **契约 (What)**：故障到达时返回其克隆；若发送端被丢弃且从未
    ///   投递过值（本地端点的正常形态），该 future 永远悬置；
    /// - **风险 (Trade-offs)**：悬置依赖调用侧用 `select!` 组合其他退出
    ///   条件，单独 `await` 本方法会阻塞任务。
    pub async fn failed(mut self) -> TransportError {
        loop {
            if let Some(error) = self.rx.borrow_and_update().clone() {
                return error;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// 非阻塞地读取已投递的故障。
    pub fn current(&self) -> Option<TransportError> {
        self.rx.borrow().clone()
    }
}

/// 创建一对传输故障通道端。
pub fn transport_error_channel() -> (TransportErrorReporter, TransportErrors) {
    let (tx, rx) = watch::channel(None);
    (TransportErrorReporter { tx }, TransportErrors { rx })
}

/// 转发端点的对象层契约。
///
/// # 教案式说明
/// - **意图 (Why)**：会话控制器只面向本契约编排 accept/dial/copy 循环，
///   本地与远端实现可独立演进；
/// - **契约 (What)**：
///   - `open()` 返回一条新的双向连接；监听端点阻塞至新客户端接入，
///     拨号端点立即拨号；
///   - `transport_errors()` 可多次调用，返回同一底层通道的克隆；
///   - `shutdown()` 幂等，必须使所有未完成的 `open()` 以
///     [`EndpointError::Shutdown`]（或等价错误）返回；
/// - **风险 (Trade-offs)**：实现内部若持有后台任务，应由 `shutdown()`
///   负责回收，契约不提供 `Drop` 之外的兜底。
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// 打开下一条转发连接。
    async fn open(&self) -> Result<Connection, EndpointError>;

    /// 订阅底层传输故障。
    fn transport_errors(&self) -> TransportErrors;

    /// 释放端点资源并解除所有阻塞中的 `open()`。
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_error_channel_delivers_first_report_only() {
        let (reporter, errors) = transport_error_channel();
        assert!(errors.current().is_none());

        assert!(reporter.report(TransportError::new("first failure")));
        assert!(!reporter.report(TransportError::new("second failure")));

        let observed = errors.clone().failed().await;
        assert_eq!(observed.message(), "first failure");
        assert_eq!(
            errors.current().expect("value retained").message(),
            "first failure"
        );
    }

    #[tokio::test]
    async fn failed_stays_pending_without_report() {
        let (reporter, errors) = transport_error_channel();
        let wait = tokio::time::timeout(std::time::Duration::from_millis(50), errors.failed());
        assert!(wait.await.is_err(), "no report should keep the future pending");
        drop(reporter);
    }

    #[tokio::test]
    async fn failed_stays_pending_after_reporter_drop() {
        let (reporter, errors) = transport_error_channel();
        drop(reporter);
        let wait = tokio::time::timeout(std::time::Duration::from_millis(50), errors.failed());
        assert!(wait.await.is_err(), "dropped reporter must not wake observers");
    }
}

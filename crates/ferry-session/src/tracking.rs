//! # tracking 模块说明
//!
//! ## 核心意图（Why）
//! - 以单调递增的状态索引协调"状态变更"与"阻塞式列举"：每次会话
//!   状态演进都推进索引并唤醒等待者，`list` 凭上一次见到的索引实现
//!   "有变化才返回"的长轮询；
//! - 停机时跟踪器被投毒，所有等待者以终止错误醒来。
//!
//! ## 行为契约（What）
//! - 索引从 1 起步、只增不减；
//! - `wait_for_change(previous)` 在索引超过 `previous`、取消令牌触发
//!   或投毒三者之一时返回；
//! - 计数器更新先于对应快照可见（互斥锁 + watch 通道给出先行发生
//!   关系）。

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::ManagerError;

/// 状态索引跟踪器。
#[derive(Debug)]
pub struct StateTracker {
    index: watch::Sender<u64>,
    poisoned: AtomicBool,
}

impl StateTracker {
    /// 创建索引为 1 的跟踪器。
    pub fn new() -> StateTracker {
        let (index, _) = watch::channel(1);
        StateTracker {
            index,
            poisoned: AtomicBool::new(false),
        }
    }

    /// 推进状态索引并唤醒所有等待者。
    pub fn notify(&self) {
        self.index.send_modify(|value| *value += 1);
    }

    /// 当前索引。
    pub fn index(&self) -> u64 {
        *self.index.borrow()
    }

    /// 终止状态跟踪：等待者以 [`ManagerError::Terminated`] 醒来。
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
        self.notify();
    }

    /// 等待索引越过 `previous`。
    pub async fn wait_for_change(
        &self,
        previous: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, ManagerError> {
        let mut receiver = self.index.subscribe();
        loop {
            if self.poisoned.load(Ordering::SeqCst) {
                return Err(ManagerError::Terminated);
            }
            let current = *receiver.borrow_and_update();
            if current > previous {
                return Ok(current);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ManagerError::Cancelled),
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return Err(ManagerError::Terminated);
                    }
                }
            }
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        StateTracker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiters_wake_when_the_index_advances() {
        let tracker = std::sync::Arc::new(StateTracker::new());
        let initial = tracker.index();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .wait_for_change(initial, &CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tracker.notify();

        let index = waiter
            .await
            .expect("waiter task")
            .expect("wait succeeds");
        assert!(index > initial);
    }

    #[tokio::test]
    async fn stale_index_returns_immediately() {
        let tracker = StateTracker::new();
        tracker.notify();
        let index = tracker
            .wait_for_change(0, &CancellationToken::new())
            .await
            .expect("index already advanced");
        assert_eq!(index, tracker.index());
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let tracker = StateTracker::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            tracker.wait_for_change(tracker.index(), &cancel).await,
            Err(ManagerError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn poison_terminates_waiters() {
        let tracker = std::sync::Arc::new(StateTracker::new());
        let current = tracker.index();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .wait_for_change(current, &CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tracker.poison();
        assert!(matches!(
            waiter.await.expect("waiter task"),
            Err(ManagerError::Terminated)
        ));
    }
}

//! # controller 模块说明
//!
//! ## 核心意图（Why）
//! - 每个转发会话配一个控制器：驱动"连接源 → 连接目的 → 接受/拨号/
//!   拷贝"的运行循环，失败时退避重连，并维护供 `list` 快照的状态
//!   记录；
//! - 三种停机模式（暂停 / 停机 / 终止）互斥且同步：`halt` 返回时
//!   运行循环已不再触碰任何端点。
//!
//! ## 状态机约束（What）
//! - 运行循环状态：创建 →（未暂停时）运行 → 停机中 → {暂停, 终止,
//!   停机}；`resume` 把暂停态送回运行态；
//! - 计数器不变式：`open` 在拷贝任务启动前严格递增、返回后严格递减；
//!   `total` 单调不减，只为成功配对递增；暂停期间二者不再变化；
//! - 暂停把 `paused = true` 重写到磁盘，终止删除持久化会话，停机
//!   保留。
//!
//! ## 风险提示（Trade-offs）
//! - 退避为倍增式（1s 起步、30s 封顶），抵达转发态后重置；
//! - 目的端装配失败按逐连接错误处理（关闭入站连接并继续接受），与
//!   远端服务侧的拨号语义一致。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ferry_core::{Endpoint, Session, State, Status, TransportError};
use ferry_stream::{Auditors, forward};
use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ManagerError;
use crate::registry;
use crate::store::SessionStore;
use crate::tracking::StateTracker;

const RECONNECT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAXIMUM: Duration = Duration::from_secs(30);

/// 停机模式。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HaltMode {
    /// 停止运行循环，保留会话并允许恢复。
    Pause,
    /// 停止运行循环，保留持久化会话（管理器停机路径）。
    Shutdown,
    /// 停止运行循环并删除持久化会话。
    Terminate,
}

/// 运行时状态记录（描述符之外的可变部分）。
#[derive(Debug, Default)]
struct StateRecord {
    status: Status,
    source_connected: bool,
    destination_connected: bool,
    last_error: String,
    open_connections: u64,
    total_connections: u64,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// 会话控制器。
pub struct Controller {
    session: Mutex<Session>,
    record: Mutex<StateRecord>,
    tracker: Arc<StateTracker>,
    store: Arc<SessionStore>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl Controller {
    /// 以新建会话构造控制器：持久化描述符，未暂停时启动运行循环。
    pub async fn create(
        session: Session,
        store: Arc<SessionStore>,
        tracker: Arc<StateTracker>,
    ) -> Result<Arc<Controller>, ManagerError> {
        session.validate()?;
        store.save(&session).map_err(ManagerError::Store)?;
        Ok(Controller::assemble(session, store, tracker).await)
    }

    /// 以磁盘加载的会话构造控制器（管理器启动路径）。
    pub async fn load(
        session: Session,
        store: Arc<SessionStore>,
        tracker: Arc<StateTracker>,
    ) -> Result<Arc<Controller>, ManagerError> {
        session.validate()?;
        Ok(Controller::assemble(session, store, tracker).await)
    }

    async fn assemble(
        session: Session,
        store: Arc<SessionStore>,
        tracker: Arc<StateTracker>,
    ) -> Arc<Controller> {
        let paused = session.paused;
        let controller = Arc::new(Controller {
            session: Mutex::new(session),
            record: Mutex::new(StateRecord::default()),
            tracker,
            store,
            run: tokio::sync::Mutex::new(None),
        });
        if !paused {
            controller.clone().start().await;
        }
        controller.tracker.notify();
        controller
    }

    /// 会话标识符。
    pub fn identifier(&self) -> String {
        self.session.lock().identifier.clone()
    }

    /// 会话名称。
    pub fn name(&self) -> Option<String> {
        self.session.lock().name.clone()
    }

    /// 当前状态快照。
    pub fn state(&self) -> State {
        let session = self.session.lock().clone();
        let record = self.record.lock();
        State {
            session,
            status: record.status,
            source_connected: record.source_connected,
            destination_connected: record.destination_connected,
            last_error: record.last_error.clone(),
            open_connections: record.open_connections,
            total_connections: record.total_connections,
        }
    }

    /// 判断控制器是否匹配一个选择规格（标识符或名称精确匹配）。
    pub fn matches_specification(&self, specification: &str) -> bool {
        let session = self.session.lock();
        session.identifier == specification
            || session.name.as_deref() == Some(specification)
    }

    async fn start(self: Arc<Self>) {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(self.clone(), cancel.clone()));
        *run = Some(RunHandle { cancel, task });
    }

    /// 同步停机：返回时运行循环已结束且不再触碰端点。
    pub async fn halt(&self, mode: HaltMode) -> Result<(), ManagerError> {
        {
            let mut run = self.run.lock().await;
            if let Some(handle) = run.take() {
                handle.cancel.cancel();
                if let Err(error) = handle.task.await {
                    warn!(target: "ferry::session", %error, "run loop terminated abnormally");
                }
            }
        }
        match mode {
            HaltMode::Pause => {
                let session = {
                    let mut session = self.session.lock();
                    session.paused = true;
                    session.clone()
                };
                self.store.save(&session).map_err(ManagerError::Store)?;
            }
            HaltMode::Shutdown => {}
            HaltMode::Terminate => {
                self.store
                    .delete(&self.identifier())
                    .map_err(ManagerError::Store)?;
            }
        }
        self.tracker.notify();
        Ok(())
    }

    /// 从暂停态恢复运行循环。
    pub async fn resume(self: Arc<Self>) -> Result<(), ManagerError> {
        let session = {
            let mut session = self.session.lock();
            session.paused = false;
            session.clone()
        };
        self.store.save(&session).map_err(ManagerError::Store)?;
        self.clone().start().await;
        self.tracker.notify();
        Ok(())
    }

    fn update_record(&self, apply: impl FnOnce(&mut StateRecord)) {
        apply(&mut self.record.lock());
        self.tracker.notify();
    }

    fn record_error(&self, error: &dyn std::fmt::Display) {
        self.update_record(|record| record.last_error = error.to_string());
    }

    fn connection_paired(&self) {
        self.update_record(|record| {
            record.open_connections += 1;
            record.total_connections += 1;
        });
    }

    fn connection_closed(&self) {
        self.update_record(|record| {
            record.open_connections = record.open_connections.saturating_sub(1);
        });
    }
}

/// 运行循环：连接两端并转发，直到被停机信号打断。
async fn run_loop(controller: Arc<Controller>, cancel: CancellationToken) {
    run_cycles(&controller, &cancel).await;
    controller.update_record(|record| {
        record.status = Status::Disconnected;
        record.source_connected = false;
        record.destination_connected = false;
    });
}

async fn run_cycles(controller: &Arc<Controller>, cancel: &CancellationToken) {
    let mut backoff = RECONNECT_BACKOFF_BASE;
    loop {
        let session = controller.session.lock().clone();

        // 连接源端点。
        controller.update_record(|record| {
            record.status = Status::ConnectingSource;
            record.source_connected = false;
            record.destination_connected = false;
        });
        let source_configuration = session.effective_source_configuration();
        let Some(source) = connect_with_backoff(
            controller,
            cancel,
            &mut backoff,
            || {
                registry::connect(
                    cancel,
                    &session.source,
                    None,
                    &session.identifier,
                    session.version,
                    &source_configuration,
                    true,
                )
            },
        )
        .await
        else {
            return;
        };
        controller.update_record(|record| {
            record.source_connected = true;
            record.status = Status::ConnectingDestination;
        });

        // 连接目的端点。
        let destination_configuration = session.effective_destination_configuration();
        let Some(destination) = connect_with_backoff(
            controller,
            cancel,
            &mut backoff,
            || {
                registry::connect(
                    cancel,
                    &session.destination,
                    None,
                    &session.identifier,
                    session.version,
                    &destination_configuration,
                    false,
                )
            },
        )
        .await
        else {
            source.shutdown().await;
            return;
        };
        controller.update_record(|record| {
            record.destination_connected = true;
            record.status = Status::ForwardingConnections;
        });
        info!(
            target: "ferry::session",
            session = %session.identifier,
            "session forwarding connections"
        );
        backoff = RECONNECT_BACKOFF_BASE;

        forward_connections(controller, source.as_ref(), destination.as_ref(), cancel).await;

        // 任何一侧失败都整体拆除并重建两端。
        source.shutdown().await;
        destination.shutdown().await;
        controller.update_record(|record| {
            record.source_connected = false;
            record.destination_connected = false;
            record.status = Status::Disconnected;
        });
        if cancel.is_cancelled() {
            return;
        }
    }
}

/// 以退避重试装配端点；停机时返回 `None`。
async fn connect_with_backoff<F, Fut>(
    controller: &Arc<Controller>,
    cancel: &CancellationToken,
    backoff: &mut Duration,
    mut connect: F,
) -> Option<Box<dyn Endpoint>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Box<dyn Endpoint>, crate::error::ConnectError>>,
{
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match connect().await {
            Ok(endpoint) => return Some(endpoint),
            Err(error) => {
                if cancel.is_cancelled() {
                    return None;
                }
                debug!(target: "ferry::session", %error, "endpoint connection failed");
                controller.record_error(&error);
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(*backoff) => {}
                }
                *backoff = (*backoff * 2).min(RECONNECT_BACKOFF_MAXIMUM);
            }
        }
    }
}

/// 接受/拨号/拷贝循环。
async fn forward_connections(
    controller: &Arc<Controller>,
    source: &dyn Endpoint,
    destination: &dyn Endpoint,
    cancel: &CancellationToken,
) {
    let copies = CancellationToken::new();
    let mut workers: JoinSet<()> = JoinSet::new();
    let source_failed = source.transport_errors().failed();
    let destination_failed = destination.transport_errors().failed();
    tokio::pin!(source_failed, destination_failed);

    loop {
        // 等待下一条入站连接，同时监听停机与两端传输故障。
        let inbound = tokio::select! {
            _ = cancel.cancelled() => break,
            error = &mut source_failed => {
                record_transport_failure(controller, "source", &error);
                break;
            }
            error = &mut destination_failed => {
                record_transport_failure(controller, "destination", &error);
                break;
            }
            _ = workers.join_next(), if !workers.is_empty() => continue,
            inbound = source.open() => match inbound {
                Ok(inbound) => inbound,
                Err(error) => {
                    controller.record_error(&error);
                    break;
                }
            },
        };

        // 为入站连接配一条目的连接；失败按逐连接错误处理。
        let outbound = tokio::select! {
            _ = cancel.cancelled() => break,
            error = &mut source_failed => {
                record_transport_failure(controller, "source", &error);
                break;
            }
            error = &mut destination_failed => {
                record_transport_failure(controller, "destination", &error);
                break;
            }
            outbound = destination.open() => match outbound {
                Ok(outbound) => outbound,
                Err(error) => {
                    controller.record_error(&error);
                    drop(inbound);
                    continue;
                }
            },
        };

        controller.connection_paired();
        let copy_cancel = copies.child_token();
        let tracked = controller.clone();
        workers.spawn(async move {
            forward(inbound, outbound, copy_cancel, Auditors::default()).await;
            tracked.connection_closed();
        });
    }

    // 拆除：取消在途拷贝并等待全部工作者退出，保证返回后没有任务
    // 仍触碰连接或计数器。
    copies.cancel();
    while workers.join_next().await.is_some() {}
}

fn record_transport_failure(controller: &Arc<Controller>, side: &str, error: &TransportError) {
    warn!(target: "ferry::session", side, %error, "endpoint transport failed");
    controller.record_error(error);
}

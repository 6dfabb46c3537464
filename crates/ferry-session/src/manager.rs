//! # manager 模块说明
//!
//! ## 核心意图（Why）
//! - 集中持有全部会话控制器：创建、阻塞式列举、暂停/恢复/终止与整体
//!   停机；
//! - 启动时从会话目录重建控制器，单个会话的加载失败降级为警告，不
//!   拖垮整个守护进程。
//!
//! ## 行为契约（What）
//! - `list` 在状态索引越过调用方给出的上次索引后才快照，结果按创建
//!   时间升序；
//! - 选择规格（标识符或名称精确匹配）必须至少命中一个会话，否则
//!   整个操作以 [`ManagerError::UnmatchedSpecification`] 失败；
//! - 全部公共操作可并发调用。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use ferry_core::{Configuration, Prompter, Session, State, Url, Version, identifier};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::controller::{Controller, HaltMode};
use crate::error::ManagerError;
use crate::store::SessionStore;
use crate::tracking::StateTracker;

/// 标签匹配器：由外部的标签选择器解析产出。
pub trait LabelMatcher: Send + Sync {
    /// 判断标签映射是否命中。
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool;
}

/// 会话选择方式。
#[derive(Clone)]
pub enum Selection {
    /// 全部会话。
    All,
    /// 按标识符或名称精确匹配；每个规格必须至少命中一个会话。
    Specifications(Vec<String>),
    /// 按标签匹配器筛选。
    Labels(Arc<dyn LabelMatcher>),
}

/// 会话管理器。
///
/// # 教案式说明
/// - **契约 (What)**：持有标识符 → 控制器映射与状态跟踪器；全部操作
///   并发安全；`shutdown` 投毒跟踪器并以停机模式停下所有控制器；
/// - **风险 (Trade-offs)**：映射基于分片并发表，持有引用期间会阻塞
///   同分片写入，所有遍历都先收集再操作。
pub struct Manager {
    tracker: Arc<StateTracker>,
    store: Arc<SessionStore>,
    sessions: DashMap<String, Arc<Controller>>,
}

impl Manager {
    /// 创建管理器并从会话目录重建控制器。
    pub async fn new(data_root: &Path) -> Result<Manager, ManagerError> {
        let store = Arc::new(SessionStore::new(data_root).map_err(ManagerError::Store)?);
        let tracker = Arc::new(StateTracker::new());
        let manager = Manager {
            tracker: tracker.clone(),
            store: store.clone(),
            sessions: DashMap::new(),
        };

        for entry in store.list_entries().map_err(ManagerError::Store)? {
            if !identifier::is_valid(&entry) {
                warn!(
                    target: "ferry::session",
                    entry = %entry,
                    "ignoring session directory entry with invalid name"
                );
                continue;
            }
            let session = match store.load(&entry) {
                Ok(session) => session,
                Err(error) => {
                    warn!(
                        target: "ferry::session",
                        session = %entry,
                        %error,
                        "unable to load session"
                    );
                    continue;
                }
            };
            match Controller::load(session, store.clone(), tracker.clone()).await {
                Ok(controller) => {
                    manager.sessions.insert(entry, controller);
                }
                Err(error) => {
                    warn!(
                        target: "ferry::session",
                        session = %entry,
                        %error,
                        "unable to restore session controller"
                    );
                }
            }
        }
        Ok(manager)
    }

    /// 创建新会话并返回其标识符。
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        source: Url,
        destination: Url,
        configuration: Configuration,
        configuration_source: Configuration,
        configuration_destination: Configuration,
        name: Option<String>,
        labels: BTreeMap<String, String>,
        paused: bool,
        prompter: Option<&dyn Prompter>,
    ) -> Result<String, ManagerError> {
        let session = Session {
            identifier: identifier::generate(),
            version: Version::V1,
            creation_time: SystemTime::now(),
            creating_version: env!("CARGO_PKG_VERSION").to_owned(),
            source,
            destination,
            configuration,
            configuration_source,
            configuration_destination,
            name,
            labels,
            paused,
        };
        let identifier = session.identifier.clone();
        let controller =
            Controller::create(session, self.store.clone(), self.tracker.clone()).await?;
        self.sessions.insert(identifier.clone(), controller);
        self.tracker.notify();
        if let Some(prompter) = prompter {
            prompter.message(&format!("Created session {identifier}"));
        }
        info!(target: "ferry::session", session = %identifier, "session created");
        Ok(identifier)
    }

    /// 阻塞式列举：等状态索引越过 `previous_index` 后快照匹配会话。
    pub async fn list(
        &self,
        cancel: &CancellationToken,
        selection: &Selection,
        previous_index: u64,
    ) -> Result<(u64, Vec<State>), ManagerError> {
        let index = self.tracker.wait_for_change(previous_index, cancel).await?;
        let controllers = self.select(selection)?;
        let mut states: Vec<State> = controllers
            .iter()
            .map(|controller| controller.state())
            .collect();
        states.sort_by_key(|state| state.session.creation_time);
        Ok((index, states))
    }

    /// 暂停选中的会话。
    pub async fn pause(
        &self,
        selection: &Selection,
        prompter: Option<&dyn Prompter>,
    ) -> Result<(), ManagerError> {
        for controller in self.select(selection)? {
            controller.halt(HaltMode::Pause).await?;
            if let Some(prompter) = prompter {
                prompter.message(&format!("Paused session {}", controller.identifier()));
            }
        }
        Ok(())
    }

    /// 恢复选中的会话。
    pub async fn resume(
        &self,
        selection: &Selection,
        prompter: Option<&dyn Prompter>,
    ) -> Result<(), ManagerError> {
        for controller in self.select(selection)? {
            controller.clone().resume().await?;
            if let Some(prompter) = prompter {
                prompter.message(&format!("Resumed session {}", controller.identifier()));
            }
        }
        Ok(())
    }

    /// 终止选中的会话并移除其控制器。
    pub async fn terminate(
        &self,
        selection: &Selection,
        prompter: Option<&dyn Prompter>,
    ) -> Result<(), ManagerError> {
        for controller in self.select(selection)? {
            controller.halt(HaltMode::Terminate).await?;
            let identifier = controller.identifier();
            self.sessions.remove(&identifier);
            if let Some(prompter) = prompter {
                prompter.message(&format!("Terminated session {identifier}"));
            }
        }
        self.tracker.notify();
        Ok(())
    }

    /// 停机：终止状态跟踪并以停机模式停下全部控制器。
    pub async fn shutdown(&self) {
        self.tracker.poison();
        let controllers: Vec<Arc<Controller>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for controller in controllers {
            if let Err(error) = controller.halt(HaltMode::Shutdown).await {
                warn!(
                    target: "ferry::session",
                    session = %controller.identifier(),
                    %error,
                    "controller shutdown failed"
                );
            }
        }
    }

    fn select(&self, selection: &Selection) -> Result<Vec<Arc<Controller>>, ManagerError> {
        let all: Vec<Arc<Controller>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        match selection {
            Selection::All => Ok(all),
            Selection::Specifications(specifications) => {
                let mut selected: Vec<Arc<Controller>> = Vec::new();
                for specification in specifications {
                    let mut matched = false;
                    for controller in &all {
                        if controller.matches_specification(specification) {
                            matched = true;
                            if !selected
                                .iter()
                                .any(|existing| existing.identifier() == controller.identifier())
                            {
                                selected.push(controller.clone());
                            }
                        }
                    }
                    if !matched {
                        return Err(ManagerError::UnmatchedSpecification {
                            specification: specification.clone(),
                        });
                    }
                }
                Ok(selected)
            }
            Selection::Labels(matcher) => Ok(all
                .into_iter()
                .filter(|controller| matcher.matches(&controller.state().session.labels))
                .collect()),
        }
    }
}

#![doc = r#"
# ferry-session

## 设计动机（Why）
- **定位**：转发子系统的编排层——协议处理器注册表把转发 URL 装配成
  端点，会话控制器驱动单个会话的生命周期，会话管理器持有并调度全部
  控制器。
- **架构角色**：对外（RPC 服务、CLI 等外部协作者）只暴露管理器的
  公共操作；对内依赖端点契约与拷贝引擎，不触碰具体传输。

## 核心契约（What）
- 会话描述符持久化在 `<data-root>/forwarding/sessions/` 下，按标识符
  命名；
- `list` 以状态索引实现"有变化才返回"的阻塞式快照；
- 暂停 / 停机 / 终止三种停机模式同步完成，各自对应保留并可恢复、
  保留待重启、删除三种持久化结果。

## 风险与考量（Trade-offs）
- 协议处理器注册表在进程启动阶段填充，运行期只读；
- 会话标识符生成使用进程内随机数，不提供跨进程唯一性协商。
"#]

pub mod controller;
pub mod error;
pub mod manager;
pub mod registry;
pub mod store;
pub mod tracking;

pub use controller::{Controller, HaltMode};
pub use error::{ConnectError, ManagerError};
pub use manager::{LabelMatcher, Manager, Selection};
pub use registry::{ProtocolHandler, connect_remote, register};
pub use store::SessionStore;
pub use tracking::StateTracker;

#![doc = r#"
# ferry-transport-local

## 设计动机（Why）
- **定位**：提供运行在本进程的两类转发端点——接受入站连接的监听端点
  与发起出站连接的拨号端点，覆盖 `tcp | tcp4 | tcp6 | unix | npipe`
  五种传输。
- **架构角色**：本地协议处理器与远端端点服务端都经由本 crate 装配
  端点；套接字覆盖/属主/权限策略也在这里落地。

## 核心契约（What）
- 监听端点支持惰性初始化：底层监听器推迟到首次 `open()` 创建，使源
  端监听器可以在目的端尚未连上时即呈现非空的接受队列；进程级开关
  [`disable_lazy_listener_initialization`] 可强制立即初始化，供确定性
  集成测试使用；
- `shutdown()` 解除阻塞中的 `open()` 并释放监听器；对从未打开过的
  惰性监听器，关闭会把一次性初始化原子地置为"已关闭"哨兵；
- Unix 监听器在绑定冲突时按生效的覆盖策略决定放弃或删除重试，绑定
  成功后按配置应用属主/属组/权限。

## 风险与考量（Trade-offs）
- `npipe` 仅在 Windows 可用，其余平台的相关路径返回结构化的
  不支持错误；
- 属主/属组说明符在应用时刻解析，说明符指向的账户在此前被删除会使
  监听器创建失败。
"#]

use std::sync::atomic::{AtomicBool, Ordering};

pub mod dialer;
pub mod listener;
mod npipe;
#[cfg(unix)]
mod socket;

pub use dialer::LocalDialer;
pub use listener::LocalListener;

static DISABLE_LAZY_LISTENER_INITIALIZATION: AtomicBool = AtomicBool::new(false);

/// 进程级开关：强制监听端点在构造时立即创建底层监听器。
pub fn disable_lazy_listener_initialization(disable: bool) {
    DISABLE_LAZY_LISTENER_INITIALIZATION.store(disable, Ordering::SeqCst);
}

/// 查询惰性初始化是否被进程级开关禁用。
pub fn lazy_listener_initialization_disabled() -> bool {
    DISABLE_LAZY_LISTENER_INITIALIZATION.load(Ordering::SeqCst)
}

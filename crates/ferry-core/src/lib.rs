#![doc = r#"
# ferry-core

## 设计动机（Why）
- **定位**：本 crate 定义双向端口转发子系统的最小公共契约：端点能力集
  （open / transport_errors / shutdown）、三值套接字策略配置、转发地址
  文法与会话数据模型。
- **架构角色**：所有传输实现（本地监听/拨号、远端多路复用端点）与会话
  编排层（控制器、管理器）都只依赖这里的契约，互相之间不产生依赖。
- **设计理念**：验证提前到构造与反序列化边界；跨线程传播的错误一律为
  结构化 [`thiserror`] 枚举；端点多态通过对象层 trait 而非继承表达。

## 核心契约（What）
- **输入条件**：调用方在 Tokio 运行时中使用 [`Endpoint`]；
- **输出保障**：`open()` 返回的连接满足 `AsyncRead + AsyncWrite + Send +
  Unpin`，传输层故障至多通过 [`TransportErrors`] 通知一次；
- **前置约束**：会话描述符在持久化与装配前必须通过
  [`Session::validate`](session::Session::validate)。

## 风险与考量（Trade-offs）
- 配置合并采用"高优先级非默认值胜出"的逐字段规则，不提供深度合并；
- 端点契约不约定流控，背压由具体传输与复用器实现自行裁决。
"#]

pub mod configuration;
pub mod endpoint;
pub mod error;
pub mod identifier;
pub mod prompting;
pub mod session;
pub mod url;
pub mod version;

pub use configuration::{Configuration, SocketOverwriteMode};
pub use endpoint::{Connection, Endpoint, Stream, TransportErrorReporter, TransportErrors};
pub use error::{AddressError, ConfigurationError, EndpointError, SessionError, TransportError};
pub use prompting::Prompter;
pub use session::{Session, State, Status};
pub use url::{ForwardingAddress, Protocol, Transport, Url};
pub use version::Version;

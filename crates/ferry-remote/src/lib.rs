#![doc = r#"
# ferry-remote

## 设计动机（Why）
- **定位**：实现远端端点协议的两侧——控制进程内的客户端端点，与
  远端代理进程内的服务循环；两者经同一条承载传输上的复用器对话。
- **架构角色**：传输处理器负责建立承载传输（SSH、容器 exec、隧道），
  把连接交给 [`RemoteEndpoint::connect`]；代理进程把它的入站连接交给
  [`serve`]。

## 核心契约（What）
- 初始化流上一问一答：[`InitializeForwardingRequest`] 描述远端应装配
  的端点，[`InitializeForwardingResponse`] 的 `error` 字段为空表示
  接受；
- 握手之后，每条转发连接对应一条复用流；流不原生支持写关闭时两侧
  对称叠加成帧包装；
- 复用器拆除经故障泵转化为端点故障通道上的一次通知。

## 风险与考量（Trade-offs）
- 远端监听器在会话中途失败采取保守策略：终结整个转发循环，由控制
  进程的重连机制重建两端；
- 初始化消息以长度前缀的二进制编码承载，解码侧设 1 MiB 上限。
"#]

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::RemoteEndpoint;
pub use error::HandshakeError;
pub use protocol::{
    InitializeForwardingRequest, InitializeForwardingResponse, MAX_MESSAGE_LENGTH,
};
pub use server::serve;

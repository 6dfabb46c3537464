#![doc = r#"
# ferry-mux

## 设计动机（Why）
- **定位**：把远端端点的单条传输连接（SSH 通道、容器 exec 流、隧道）
  拆成多条独立的双向流，每条转发连接占用一条流。
- **架构角色**：远端端点客户端与服务端只依赖 [`Multiplexer`] 契约；
  [`FrameMux`] 是随核心交付的参考实现，包装第三方复用器的实现可在
  不触碰调用方的前提下替换。

## 核心契约（What）
- `open_stream` / `accept_stream` 配对出现：一端打开，另一端接受；
- `closed()` 在拆除时完成，`internal_error()` 给出根因或主动关闭的
  [`MuxError::Closed`] 哨兵；
- `half_close_native()` 告知调用方是否需要对称叠加写关闭成帧包装。

## 风险与考量（Trade-offs）
- 参考实现的流控只有入站队列深度一档，慢消费者会减缓同一复用器上
  的全部流；
- 加密与对端认证不在本层，交由承载传输解决。
"#]

pub mod error;
pub mod frame;
pub mod mux;
pub mod stream;

pub use error::MuxError;
pub use mux::{FrameMux, Multiplexer};
pub use stream::MuxStream;

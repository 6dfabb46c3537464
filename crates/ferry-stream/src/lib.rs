#![doc = r#"
# ferry-stream

## 设计动机（Why）
- **定位**：提供转发链路的两块字节级积木——为缺少半关闭原语的流补上
  写关闭语义的成帧包装，以及带取消与审计能力的双向拷贝引擎。
- **架构角色**：位于端点实现与会话编排之间；远端复用器流与字节模式
  命名管道经 [`FramedStream`] 获得写关闭，随后与本地套接字一样交给
  [`forward`] 驱动。

## 核心契约（What）
- 成帧协议：16 位大端长度前缀，0 长度帧为单向 EOF 哨兵，至多发送
  一次；连接两端必须对称地使用或不使用包装；
- 拷贝引擎：干净 EOF 转译为对端写关闭；错误与取消终止整个拷贝并
  关闭两条连接；审计器在字节交付目的端之前被调用。

## 风险与考量（Trade-offs）
- 成帧包装不支持配置读写截止时间，只应在不需要截止时间的链路上使用；
- 拷贝引擎吞掉错误，观测交由端点故障通道承担。
"#]

pub mod copy;
pub mod framing;

pub use copy::{Auditor, Auditors, forward};
pub use framing::{FramedStream, FramingError, MAX_FRAME_PAYLOAD};

//! # framing 模块说明
//!
//! ## 核心意图（Why）
//! - 部分字节流（复用器流、字节模式命名管道）不提供"只关写方向"的
//!   原语；本模块在其上叠加极小的定长头成帧协议，换取写关闭语义：
//!   每次写入前置 16 位大端长度，长度为 0 的帧是单向 EOF 哨兵；
//! - 成帧只服务于写关闭，不提供消息边界保证——读方把帧内容当连续
//!   字节流消费。
//!
//! ## 行为契约（What）
//! - 连接两端必须同时使用本包装或同时不用，单边使用会破坏字节流；
//! - 写关闭后写入返回 [`FramingError::ClosedForWrites`]；重复写关闭
//!   返回 [`FramingError::AlreadyClosed`]；
//! - 超过 65535 字节的单次写入被拒绝且不落线；空写入不落线；
//! - 读端把最后一次 IO 错误持久化，后续读取重复返回同一错误。
//!
//! ## 风险提示（Trade-offs）
//! - 包装层不转发底层的全关闭：`poll_shutdown` 只发送 EOF 哨兵，底层
//!   资源回收由所有者丢弃时完成；
//! - 底层流不提供读写截止时间配置入口，因此"不支持截止时间"的约束
//!   在构造层面即成立。

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// 单帧载荷上限（16 位长度可表达的最大值）。
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// 成帧包装的协议错误。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FramingError {
    /// 写方向已关闭，拒绝后续写入。
    #[error("stream closed for writes")]
    ClosedForWrites,

    /// 写关闭已执行过，拒绝重复关闭。
    #[error("write closure already signalled")]
    AlreadyClosed,

    /// 单次写入超过帧载荷上限。
    #[error("payload of {size} bytes exceeds maximum frame size")]
    TooLarge { size: usize },

    /// 在帧未写完时请求写关闭。
    #[error("write closure attempted with partially written frame")]
    PartialFrame,
}

impl FramingError {
    fn into_io(self) -> io::Error {
        let kind = match self {
            FramingError::ClosedForWrites => io::ErrorKind::BrokenPipe,
            FramingError::AlreadyClosed | FramingError::PartialFrame => {
                io::ErrorKind::InvalidInput
            }
            FramingError::TooLarge { .. } => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, self)
    }

    /// 从 IO 错误中提取协议错误（供调用方与测试分类使用）。
    pub fn classify(error: &io::Error) -> Option<&FramingError> {
        error
            .get_ref()
            .and_then(|source| source.downcast_ref::<FramingError>())
    }
}

#[derive(Debug)]
enum WritePhase {
    /// 无在途帧。
    Idle,
    /// 正在写入当前帧的长度头。
    Header { length: usize, written: usize },
    /// 头已写完，正在推送载荷。
    Payload { remaining: usize },
}

#[derive(Debug)]
struct WriteState {
    phase: WritePhase,
    /// EOF 哨兵头的写入进度（写关闭期间使用）。
    closing_written: usize,
    closing: bool,
    closed: bool,
}

#[derive(Debug)]
struct ReadState {
    header: [u8; 2],
    header_filled: usize,
    /// 当前帧尚未交付的载荷字节数。
    remaining: usize,
    eof: bool,
    /// 持久化的读错误（kind + 描述），用于在后续读取上重放。
    failure: Option<(io::ErrorKind, String)>,
}

/// 为缺少写关闭原语的字节流叠加写关闭语义的包装。
///
/// # 教案式说明
/// - **意图 (Why)**：让双向拷贝引擎可以把"源侧读到 EOF"转译为"目的
///   侧写关闭"，即使底层只是复用器流或字节模式管道；
/// - **契约 (What)**：实现 [`AsyncRead`] / [`AsyncWrite`]；
///   `poll_shutdown` 即写关闭，只发送长度为 0 的哨兵帧并冲刷底层，
///   不触碰底层的 shutdown；
/// - **执行 (How)**：读写两个方向各自维护独立状态机，互不加锁——
///   并发安全由 `tokio::io::split` 的半部锁与 `&mut` 独占共同给出；
/// - **风险 (Trade-offs)**：帧在途时调用方必须以同一缓冲区前缀重试
///   （`write_all` 纪律）；帧长度在首次提交时固定。
#[derive(Debug)]
pub struct FramedStream<S> {
    inner: S,
    read: ReadState,
    write: WriteState,
}

impl<S> FramedStream<S> {
    /// 包装一条底层字节流。
    pub fn new(inner: S) -> FramedStream<S> {
        FramedStream {
            inner,
            read: ReadState {
                header: [0; 2],
                header_filled: 0,
                remaining: 0,
                eof: false,
                failure: None,
            },
            write: WriteState {
                phase: WritePhase::Idle,
                closing_written: 0,
                closing: false,
                closed: false,
            },
        }
    }

    /// 访问底层流。
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> AsyncRead for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some((kind, message)) = &this.read.failure {
            return Poll::Ready(Err(io::Error::new(*kind, message.clone())));
        }
        if this.read.eof || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // 惰性读取下一帧头：持久化失败，0 长度帧落定 EOF。
        while this.read.remaining == 0 {
            while this.read.header_filled < 2 {
                let mut header = ReadBuf::new(&mut this.read.header[this.read.header_filled..2]);
                match ready!(Pin::new(&mut this.inner).poll_read(cx, &mut header)) {
                    Ok(()) => {
                        let count = header.filled().len();
                        if count == 0 {
                            let failure = (
                                io::ErrorKind::UnexpectedEof,
                                "stream ended before write closure".to_owned(),
                            );
                            this.read.failure = Some(failure.clone());
                            return Poll::Ready(Err(io::Error::new(failure.0, failure.1)));
                        }
                        this.read.header_filled += count;
                    }
                    Err(error) => {
                        this.read.failure = Some((error.kind(), error.to_string()));
                        return Poll::Ready(Err(error));
                    }
                }
            }
            this.read.header_filled = 0;
            let length = u16::from_be_bytes(this.read.header) as usize;
            if length == 0 {
                this.read.eof = true;
                return Poll::Ready(Ok(()));
            }
            this.read.remaining = length;
        }

        // 单次交付不跨帧：读取量以当前帧剩余为上限。
        let take = this.read.remaining.min(buf.remaining());
        let mut limited = buf.take(take);
        match ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited)) {
            Ok(()) => {
                let count = limited.filled().len();
                if count == 0 {
                    let failure = (
                        io::ErrorKind::UnexpectedEof,
                        "stream ended inside frame".to_owned(),
                    );
                    this.read.failure = Some(failure.clone());
                    return Poll::Ready(Err(io::Error::new(failure.0, failure.1)));
                }
                // limited 只覆盖 buf 未填充区的前缀，这里把初始化进度同步回去。
                unsafe {
                    buf.assume_init(count);
                }
                buf.advance(count);
                this.read.remaining -= count;
                Poll::Ready(Ok(()))
            }
            Err(error) => {
                this.read.failure = Some((error.kind(), error.to_string()));
                Poll::Ready(Err(error))
            }
        }
    }
}

impl<S> AsyncWrite for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.write.closed || this.write.closing {
            return Poll::Ready(Err(FramingError::ClosedForWrites.into_io()));
        }

        if let WritePhase::Idle = this.write.phase {
            if buf.is_empty() {
                // 空写入不落线：0 长度帧保留给 EOF 哨兵。
                return Poll::Ready(Ok(0));
            }
            if buf.len() > MAX_FRAME_PAYLOAD {
                return Poll::Ready(Err(FramingError::TooLarge { size: buf.len() }.into_io()));
            }
            this.write.phase = WritePhase::Header {
                length: buf.len(),
                written: 0,
            };
        }

        if let WritePhase::Header { length, written } = &mut this.write.phase {
            let header = (*length as u16).to_be_bytes();
            while *written < header.len() {
                let count =
                    ready!(Pin::new(&mut this.inner).poll_write(cx, &header[*written..]))?;
                if count == 0 {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                *written += count;
            }
            let remaining = *length;
            this.write.phase = WritePhase::Payload { remaining };
        }

        let WritePhase::Payload { remaining } = &mut this.write.phase else {
            unreachable!("write phase advanced past payload with bytes outstanding");
        };
        let mut transferred = 0usize;
        while *remaining > 0 && transferred < buf.len() {
            let window = (*remaining).min(buf.len() - transferred);
            let chunk = &buf[transferred..transferred + window];
            match Pin::new(&mut this.inner).poll_write(cx, chunk) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(count)) => {
                    transferred += count;
                    *remaining -= count;
                }
                Poll::Ready(Err(error)) => return Poll::Ready(Err(error)),
                Poll::Pending => {
                    // 部分写以已转移的载荷字节数上报，帧头不计入。
                    return if transferred > 0 {
                        Poll::Ready(Ok(transferred))
                    } else {
                        Poll::Pending
                    };
                }
            }
        }
        if *remaining == 0 {
            this.write.phase = WritePhase::Idle;
        }
        Poll::Ready(Ok(transferred))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.write.closed {
            return Poll::Ready(Err(FramingError::AlreadyClosed.into_io()));
        }
        if !this.write.closing {
            if !matches!(this.write.phase, WritePhase::Idle) {
                return Poll::Ready(Err(FramingError::PartialFrame.into_io()));
            }
            this.write.closing = true;
            this.write.closing_written = 0;
        }

        const SENTINEL: [u8; 2] = [0, 0];
        while this.write.closing_written < SENTINEL.len() {
            let count = ready!(
                Pin::new(&mut this.inner).poll_write(cx, &SENTINEL[this.write.closing_written..])
            )?;
            if count == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.write.closing_written += count;
        }
        ready!(Pin::new(&mut this.inner).poll_flush(cx))?;
        this.write.closing = false;
        this.write.closed = true;
        Poll::Ready(Ok(()))
    }
}

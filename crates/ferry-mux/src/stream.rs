//! 复用器流：`FrameMux` 承载的单条双向字节流。

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::frame::{Frame, MAX_DATA_PAYLOAD};
use crate::mux::StreamRegistry;

/// 一条复用流。
///
/// # 教案式说明
/// - **契约 (What)**：实现 [`AsyncRead`] / [`AsyncWrite`]；写路径把数据
///   切成不超过 65535 字节的 `Data` 帧经写任务落线；`poll_shutdown`
///   与 `Drop` 都会发送 `Close` 帧并注销本地流表项；
/// - **风险 (Trade-offs)**：`Close` 同时终结两个方向——本实现不提供
///   原生写关闭，半关闭语义由上层的成帧包装补齐；写路径无背压，
///   依赖上层拷贝引擎的逐块节奏约束在途数据量。
#[derive(Debug)]
pub struct MuxStream {
    id: u32,
    registry: StreamRegistry,
    incoming: mpsc::Receiver<Bytes>,
    buffered: Bytes,
    closed: bool,
}

impl MuxStream {
    pub(crate) fn new(id: u32, registry: StreamRegistry, incoming: mpsc::Receiver<Bytes>) -> Self {
        MuxStream {
            id,
            registry,
            incoming,
            buffered: Bytes::new(),
            closed: false,
        }
    }

    /// 流标识。
    pub fn id(&self) -> u32 {
        self.id
    }

    fn send_close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.registry.release(self.id);
        }
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.buffered.is_empty() {
            match ready!(this.incoming.poll_recv(cx)) {
                Some(chunk) => this.buffered = chunk,
                // 发送端被注销：对端关闭或复用器整体拆除，统一表现为 EOF。
                None => return Poll::Ready(Ok(())),
            }
        }
        let count = this.buffered.len().min(buf.remaining());
        buf.put_slice(&this.buffered.split_to(count));
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let count = buf.len().min(MAX_DATA_PAYLOAD);
        let frame = Frame::Data {
            stream: this.id,
            payload: Bytes::copy_from_slice(&buf[..count]),
        };
        if this.registry.send_frame(frame).is_err() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Poll::Ready(Ok(count))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // 写任务逐帧冲刷底层传输，这里无缓冲可刷。
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().send_close();
        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        self.send_close();
    }
}

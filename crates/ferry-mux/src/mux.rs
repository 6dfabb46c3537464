//! # mux 模块说明
//!
//! ## 核心意图（Why）
//! - 把一条字节流传输拆成多条相互独立的双向流：读任务按帧解复用到
//!   各流的入站队列，写任务把所有流的出站帧串行落线；
//! - 客户端/服务端角色只决定流号奇偶（客户端奇数、服务端偶数），
//!   避免双端同时发起时的流号碰撞。
//!
//! ## 行为契约（What）
//! - `open_stream` 本地即时生效（无远端确认），对端经 `accept_stream`
//!   观察到新流；
//! - 任一任务遭遇传输失败即记录根因、触发 `closed()` 并拆除全部流；
//!   主动 `shutdown()` 记录 [`MuxError::Closed`] 哨兵；
//! - 复用器拆除后，存活流的读端统一表现为 EOF，写端返回 `BrokenPipe`。
//!
//! ## 风险提示（Trade-offs）
//! - 入站按流排队，队列打满时读任务整体暂停——这是本实现唯一的流控
//!   手段，慢消费者会拖住同复用器上的其他流；
//! - 出站帧通道无界，流量节奏由上层拷贝引擎的逐块读写约束。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use ferry_core::Connection;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::MuxError;
use crate::frame::{Frame, FrameHeader, HEADER_LENGTH};
use crate::stream::MuxStream;

/// 单流入站队列深度。
const STREAM_QUEUE_DEPTH: usize = 32;
/// 待接受流队列深度。
const ACCEPT_QUEUE_DEPTH: usize = 16;

/// 流多路复用器的对象层契约。
///
/// # 教案式说明
/// - **意图 (Why)**：远端端点只面向本契约工作，参考实现与包装第三方
///   复用器的实现可以互换；
/// - **契约 (What)**：
///   - `open_stream` / `accept_stream` 返回的连接满足端点连接的全部
///     约束；
///   - `closed()` 在复用器拆除时完成，此后 `internal_error()` 返回根因
///     （主动关闭时为 [`MuxError::Closed`] 哨兵）；
///   - `half_close_native()` 声明流是否原生携带写关闭——否则调用方
///     必须在两端对称地叠加成帧包装；
/// - **风险 (Trade-offs)**：关闭复用器会立刻终结所有存活流，调用方
///   不应在 `shutdown()` 后继续持有流读写。
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// 主动打开一条新流。
    async fn open_stream(&self) -> Result<Connection, MuxError>;

    /// 接受对端打开的下一条流。
    async fn accept_stream(&self) -> Result<Connection, MuxError>;

    /// 流是否原生支持写关闭。
    fn half_close_native(&self) -> bool;

    /// 等待复用器拆除。
    async fn closed(&self);

    /// 拆除后的根因（拆除前为 `None`）。
    fn internal_error(&self) -> Option<MuxError>;

    /// 主动关闭复用器并释放底层传输。
    async fn shutdown(&self);
}

#[derive(Debug)]
struct Shared {
    frames: mpsc::UnboundedSender<Frame>,
    streams: Mutex<HashMap<u32, mpsc::Sender<Bytes>>>,
    closed: CancellationToken,
    failure: Mutex<Option<MuxError>>,
}

impl Shared {
    /// 记录首个根因并触发拆除；重复调用只保留最早的根因。
    fn fail(&self, error: MuxError) {
        {
            let mut slot = self.failure.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.closed.cancel();
    }

    fn clear_streams(&self) {
        self.streams.lock().clear();
    }
}

/// 流侧句柄：出站帧发送与流表注销。
#[derive(Clone, Debug)]
pub(crate) struct StreamRegistry {
    shared: Arc<Shared>,
}

impl StreamRegistry {
    pub(crate) fn send_frame(&self, frame: Frame) -> Result<(), ()> {
        self.shared.frames.send(frame).map_err(|_| ())
    }

    /// 注销本地流表项；仅当表项仍然存在（即本端先于对端关闭）时补发
    /// `Close` 帧。
    pub(crate) fn release(&self, id: u32) {
        let present = self.shared.streams.lock().remove(&id).is_some();
        if present {
            let _ = self.shared.frames.send(Frame::Close { stream: id });
        }
    }
}

/// 帧复用器参考实现。
#[derive(Debug)]
pub struct FrameMux {
    shared: Arc<Shared>,
    accepts: tokio::sync::Mutex<mpsc::Receiver<MuxStream>>,
    next_stream: AtomicU32,
}

impl FrameMux {
    /// 以客户端角色包装一条传输连接（流号取奇数）。
    pub fn client(connection: Connection) -> Arc<FrameMux> {
        FrameMux::new(connection, 1)
    }

    /// 以服务端角色包装一条传输连接（流号取偶数）。
    pub fn server(connection: Connection) -> Arc<FrameMux> {
        FrameMux::new(connection, 2)
    }

    fn new(connection: Connection, first_stream: u32) -> Arc<FrameMux> {
        let (reader, writer) = tokio::io::split(connection);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let shared = Arc::new(Shared {
            frames: frames_tx,
            streams: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
            failure: Mutex::new(None),
        });

        tokio::spawn(write_task(writer, frames_rx, shared.clone()));
        tokio::spawn(read_task(reader, accept_tx, shared.clone()));

        Arc::new(FrameMux {
            shared,
            accepts: tokio::sync::Mutex::new(accept_rx),
            next_stream: AtomicU32::new(first_stream),
        })
    }

    fn registry(&self) -> StreamRegistry {
        StreamRegistry {
            shared: self.shared.clone(),
        }
    }

    fn error_or_closed(&self) -> MuxError {
        self.internal_error().unwrap_or(MuxError::Closed)
    }
}

#[async_trait]
impl Multiplexer for FrameMux {
    async fn open_stream(&self) -> Result<Connection, MuxError> {
        if self.shared.closed.is_cancelled() {
            return Err(self.error_or_closed());
        }
        let id = self.next_stream.fetch_add(2, Ordering::Relaxed);
        let (data_tx, data_rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
        self.shared.streams.lock().insert(id, data_tx);
        if self.shared.frames.send(Frame::Open { stream: id }).is_err() {
            self.shared.streams.lock().remove(&id);
            return Err(self.error_or_closed());
        }
        Ok(Box::new(MuxStream::new(id, self.registry(), data_rx)))
    }

    async fn accept_stream(&self) -> Result<Connection, MuxError> {
        let mut accepts = self.accepts.lock().await;
        tokio::select! {
            biased;
            stream = accepts.recv() => match stream {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(self.error_or_closed()),
            },
            _ = self.shared.closed.cancelled() => Err(self.error_or_closed()),
        }
    }

    fn half_close_native(&self) -> bool {
        // `Close` 帧终结整个流，写关闭需由上层成帧包装补齐。
        false
    }

    async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    fn internal_error(&self) -> Option<MuxError> {
        self.shared.failure.lock().clone()
    }

    async fn shutdown(&self) {
        self.shared.fail(MuxError::Closed);
        self.shared.clear_streams();
    }
}

async fn write_task(
    mut writer: WriteHalf<Connection>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
) {
    let mut buffer = BytesMut::new();
    loop {
        let frame = tokio::select! {
            _ = shared.closed.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        buffer.clear();
        frame.encode(&mut buffer);
        let written = async {
            writer.write_all(&buffer).await?;
            writer.flush().await
        };
        if let Err(error) = written.await {
            debug!(target: "ferry::mux", %error, "multiplexer write failed");
            shared.fail(MuxError::transport(&error));
            break;
        }
    }
    // 拆除前尽力排空已入队的帧：主动关闭的瞬间可能刚有帧被排入
    // （典型如握手响应），不排空会让对端永远等不到它。
    while let Ok(frame) = frames.try_recv() {
        buffer.clear();
        frame.encode(&mut buffer);
        if writer.write_all(&buffer).await.is_err() {
            break;
        }
    }
    let _ = writer.flush().await;
    shared.clear_streams();
}

async fn read_task(
    mut reader: ReadHalf<Connection>,
    accepts: mpsc::Sender<MuxStream>,
    shared: Arc<Shared>,
) {
    let registry = StreamRegistry {
        shared: shared.clone(),
    };
    loop {
        let mut header = [0u8; HEADER_LENGTH];
        let received = tokio::select! {
            _ = shared.closed.cancelled() => break,
            received = reader.read_exact(&mut header) => received,
        };
        if let Err(error) = received {
            debug!(target: "ferry::mux", %error, "multiplexer transport ended");
            shared.fail(MuxError::transport(&error));
            break;
        }
        let (decoded, length) = match Frame::decode_header(&header) {
            Ok(decoded) => decoded,
            Err(kind) => {
                shared.fail(MuxError::protocol(format!("unknown frame kind {kind}")));
                break;
            }
        };
        match decoded {
            FrameHeader::Open { stream } => {
                let (data_tx, data_rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
                let duplicate = shared.streams.lock().insert(stream, data_tx).is_some();
                if duplicate {
                    shared.fail(MuxError::protocol(format!("duplicate stream id {stream}")));
                    break;
                }
                let accepted = MuxStream::new(stream, registry.clone(), data_rx);
                let delivered = tokio::select! {
                    _ = shared.closed.cancelled() => break,
                    delivered = accepts.send(accepted) => delivered,
                };
                if delivered.is_err() {
                    break;
                }
            }
            FrameHeader::Data { stream } => {
                let mut payload = vec![0u8; length];
                let received = tokio::select! {
                    _ = shared.closed.cancelled() => break,
                    received = reader.read_exact(&mut payload) => received,
                };
                if let Err(error) = received {
                    shared.fail(MuxError::transport(&error));
                    break;
                }
                let sender = shared.streams.lock().get(&stream).cloned();
                let Some(sender) = sender else {
                    // 本端已关闭该流：剩余在途数据静默丢弃。
                    continue;
                };
                let delivered = tokio::select! {
                    _ = shared.closed.cancelled() => break,
                    delivered = sender.send(Bytes::from(payload)) => delivered,
                };
                if delivered.is_err() {
                    shared.streams.lock().remove(&stream);
                }
            }
            FrameHeader::Close { stream } => {
                shared.streams.lock().remove(&stream);
            }
        }
    }
    shared.clear_streams();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn mux_pair() -> (Arc<FrameMux>, Arc<FrameMux>) {
        let (client_side, server_side) = duplex(1 << 16);
        (
            FrameMux::client(Box::new(client_side)),
            FrameMux::server(Box::new(server_side)),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_and_accept_carry_data_both_ways() {
        let (client, server) = mux_pair().await;

        let mut outbound = client.open_stream().await.expect("open stream");
        let mut inbound = server.accept_stream().await.expect("accept stream");

        outbound.write_all(b"request").await.expect("client write");
        let mut buffer = [0u8; 7];
        inbound.read_exact(&mut buffer).await.expect("server read");
        assert_eq!(&buffer, b"request");

        inbound.write_all(b"response").await.expect("server write");
        let mut buffer = [0u8; 8];
        outbound.read_exact(&mut buffer).await.expect("client read");
        assert_eq!(&buffer, b"response");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_streams_stay_isolated() {
        let (client, server) = mux_pair().await;

        let mut first = client.open_stream().await.expect("open first");
        let mut second = client.open_stream().await.expect("open second");
        let mut accepted_first = server.accept_stream().await.expect("accept first");
        let mut accepted_second = server.accept_stream().await.expect("accept second");

        first.write_all(b"alpha").await.expect("write first");
        second.write_all(b"beta").await.expect("write second");

        let mut buffer = [0u8; 5];
        accepted_first
            .read_exact(&mut buffer)
            .await
            .expect("read first");
        assert_eq!(&buffer, b"alpha");
        let mut buffer = [0u8; 4];
        accepted_second
            .read_exact(&mut buffer)
            .await
            .expect("read second");
        assert_eq!(&buffer, b"beta");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_a_stream_surfaces_eof_at_the_peer() {
        let (client, server) = mux_pair().await;

        let mut outbound = client.open_stream().await.expect("open stream");
        let mut inbound = server.accept_stream().await.expect("accept stream");

        outbound.write_all(b"bye").await.expect("write");
        drop(outbound);

        let mut received = Vec::new();
        inbound
            .read_to_end(&mut received)
            .await
            .expect("read until EOF");
        assert_eq!(received, b"bye");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_fires_closed_with_sentinel_error() {
        let (client, server) = mux_pair().await;

        client.shutdown().await;
        client.closed().await;
        assert_eq!(client.internal_error(), Some(MuxError::Closed));
        assert!(matches!(
            client.open_stream().await,
            Err(MuxError::Closed)
        ));

        // 对端经由传输挂断观察到拆除。
        server.closed().await;
        assert!(matches!(
            server.internal_error(),
            Some(MuxError::Transport { .. })
        ));
        assert!(server.accept_stream().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_loss_tears_down_live_streams() {
        let (client_side, server_side) = duplex(1 << 16);
        let client = FrameMux::client(Box::new(client_side));
        let server = FrameMux::server(Box::new(server_side));

        let mut outbound = client.open_stream().await.expect("open stream");
        let _inbound = server.accept_stream().await.expect("accept stream");

        server.shutdown().await;
        client.closed().await;

        let mut buffer = [0u8; 1];
        let count = outbound.read(&mut buffer).await.expect("read sees EOF");
        assert_eq!(count, 0);
    }
}

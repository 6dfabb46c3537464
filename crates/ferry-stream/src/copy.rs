//! # copy 模块说明
//!
//! ## 核心意图（Why）
//! - 在一对已建立的连接之间双向搬运字节，直到 EOF、错误或取消；
//! - 把"源侧读尽"转译为"目的侧写关闭"，让半关闭语义穿透转发链路。
//!
//! ## 行为契约（What）
//! - 任一方向以干净 EOF 结束时，对其目的端执行写关闭并继续等待另一
//!   方向；两个方向都成功、任一方向出错或取消令牌触发时整体返回；
//! - 返回后两条连接均已随本调用被丢弃关闭，拷贝逻辑保证不再触碰；
//! - 错误被吞掉——观测依赖端点的传输故障通道与连接关闭本身。

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// 按方向挂接的字节审计器：在交付目的端之前观察每个数据块。
pub type Auditor = Box<dyn FnMut(&[u8]) + Send>;

/// 两个方向的审计器配置。
#[derive(Default)]
pub struct Auditors {
    /// 观察 `first → second` 方向。
    pub first_to_second: Option<Auditor>,
    /// 观察 `second → first` 方向。
    pub second_to_first: Option<Auditor>,
}

/// 在两条连接之间双向转发字节。
///
/// # 教案式注释
/// - **意图 (Why)**：转发循环把每对 accept/dial 连接交给本函数，随后
///   只关心它何时返回；
/// - **契约 (What)**：两条连接都必须支持写关闭（原生或经成帧包装）；
///   `cancel` 触发后函数在下一个调度点收束并关闭两条连接；
/// - **执行 (How)**：`tokio::io::split` 拆出读写半部，两个单向拷贝
///   future 在同一任务内与取消信号 `select!`，避免孤儿任务持有流；
/// - **风险 (Trade-offs)**：错误不向上传播，仅以 `debug!` 记录——这是
///   刻意的：逐连接错误对会话而言是常态而非故障。
pub async fn forward<A, B>(first: A, second: B, cancel: CancellationToken, auditors: Auditors)
where
    A: AsyncRead + AsyncWrite + Send + Unpin,
    B: AsyncRead + AsyncWrite + Send + Unpin,
{
    let Auditors {
        first_to_second,
        second_to_first,
    } = auditors;

    let (mut first_reader, mut first_writer) = tokio::io::split(first);
    let (mut second_reader, mut second_writer) = tokio::io::split(second);

    let forward = copy_direction(&mut first_reader, &mut second_writer, first_to_second);
    let backward = copy_direction(&mut second_reader, &mut first_writer, second_to_first);
    tokio::pin!(forward, backward);

    let mut forward_done = false;
    let mut backward_done = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "ferry::stream", "copy cancelled");
                break;
            }
            result = &mut forward, if !forward_done => match result {
                Ok(()) => forward_done = true,
                Err(error) => {
                    debug!(target: "ferry::stream", %error, "forward copy failed");
                    break;
                }
            },
            result = &mut backward, if !backward_done => match result {
                Ok(()) => backward_done = true,
                Err(error) => {
                    debug!(target: "ferry::stream", %error, "backward copy failed");
                    break;
                }
            },
        }
        if forward_done && backward_done {
            break;
        }
    }
    // 拷贝 future 与四个半部在此一并丢弃，两条连接随之关闭。
}

async fn copy_direction<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut auditor: Option<Auditor>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let count = reader.read(&mut buffer).await?;
        if count == 0 {
            // 干净 EOF：向目的端转发写关闭。
            writer.shutdown().await?;
            return Ok(());
        }
        if let Some(audit) = auditor.as_mut() {
            audit(&buffer[..count]);
        }
        writer.write_all(&buffer[..count]).await?;
        writer.flush().await?;
    }
}

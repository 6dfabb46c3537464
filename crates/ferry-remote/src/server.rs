//! # server 模块说明
//!
//! ## 核心意图（Why）
//! - 在远端进程内服务一条入站承载传输的整个生命周期：接受初始化流、
//!   校验请求、装配本地端点、答复，然后进入转发循环；
//! - 监听方与拨号方的循环方向相反：监听方把本地接受的连接推成新的
//!   复用流，拨号方把对端的新流配上一次本地拨号。
//!
//! ## 行为契约（What）
//! - 装配失败的原因以文本写入响应的 `error` 字段后返回，不进入转发
//!   循环；
//! - 拨号方的单次本地拨号失败只关闭对应流并继续（逐连接错误非致命）；
//!   监听方的接受失败与复用器失败终结整个循环；
//! - 返回前本地端点被关闭，复用器被拆除，在途拷贝被取消。

use std::sync::Arc;

use ferry_core::{Connection, Endpoint, Version};
use ferry_mux::{FrameMux, Multiplexer};
use ferry_stream::{Auditors, FramedStream, forward};
use ferry_transport_local::{LocalDialer, LocalListener};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::HandshakeError;
use crate::protocol::{
    InitializeForwardingRequest, InitializeForwardingResponse, receive_message, send_message,
};

/// 服务一条入站承载传输。
///
/// # 教案式注释
/// - **契约 (What)**：初始化阶段失败返回 `Err`；转发循环的终结（传输
///   挂断、本地端点失败）属于正常生命周期，返回 `Ok(())`；
/// - **后置条件**：返回时复用器与本地端点均已释放。
pub async fn serve(connection: Connection) -> Result<(), HandshakeError> {
    let mux: Arc<dyn Multiplexer> = FrameMux::server(connection);
    let served = serve_multiplexer(mux.as_ref()).await;
    mux.shutdown().await;
    served
}

async fn serve_multiplexer(mux: &dyn Multiplexer) -> Result<(), HandshakeError> {
    // 初始化流：一问一答，然后关闭。
    let mut init_stream = mux.accept_stream().await?;
    let request: InitializeForwardingRequest = receive_message(&mut init_stream).await?;

    let constructed = construct_endpoint(&request).await;
    let response = InitializeForwardingResponse {
        error: constructed
            .as_ref()
            .err()
            .map(ToString::to_string)
            .unwrap_or_default(),
    };
    send_message(&mut init_stream, &response).await?;
    let _ = init_stream.shutdown().await;
    drop(init_stream);

    let endpoint = constructed?;
    forwarding_loop(mux, endpoint.as_ref(), request.listener).await;
    endpoint.shutdown().await;
    Ok(())
}

/// 按请求字段装配本地端点（监听方立即初始化）。
async fn construct_endpoint(
    request: &InitializeForwardingRequest,
) -> Result<Box<dyn Endpoint>, HandshakeError> {
    request.validate()?;
    let address = request.forwarding_address()?;
    // validate 已确认版本受支持。
    let version = Version::try_from(request.version).map_err(|_| {
        HandshakeError::UnsupportedVersion {
            version: request.version,
        }
    })?;
    if request.listener {
        let listener =
            LocalListener::new(version, request.configuration.clone(), address, false)
                .await
                .map_err(|error| HandshakeError::Endpoint {
                    message: error.to_string(),
                })?;
        Ok(Box::new(listener))
    } else {
        Ok(Box::new(LocalDialer::new(address)))
    }
}

async fn forwarding_loop(mux: &dyn Multiplexer, endpoint: &dyn Endpoint, listener: bool) {
    let copies = CancellationToken::new();
    loop {
        if listener {
            // 监听方：本地接受一条连接，再向对端推一条新流。
            let local = tokio::select! {
                _ = mux.closed() => break,
                local = endpoint.open() => match local {
                    Ok(local) => local,
                    Err(error) => {
                        debug!(target: "ferry::remote", %error, "listener endpoint failed");
                        break;
                    }
                },
            };
            let stream = match mux.open_stream().await {
                Ok(stream) => stream,
                Err(error) => {
                    debug!(target: "ferry::remote", %error, "unable to open outbound stream");
                    break;
                }
            };
            spawn_copy(local, stream, mux.half_close_native(), copies.child_token());
        } else {
            // 拨号方：接受对端的新流，配上一次本地拨号。
            let stream = tokio::select! {
                _ = mux.closed() => break,
                stream = mux.accept_stream() => match stream {
                    Ok(stream) => stream,
                    Err(error) => {
                        debug!(target: "ferry::remote", %error, "unable to accept stream");
                        break;
                    }
                },
            };
            match endpoint.open().await {
                Ok(local) => {
                    spawn_copy(local, stream, mux.half_close_native(), copies.child_token());
                }
                Err(error) => {
                    // 逐连接拨号失败：关闭对应流并继续服务。
                    warn!(target: "ferry::remote", %error, "per-connection dial failed");
                    drop(stream);
                }
            }
        }
    }
    copies.cancel();
}

fn spawn_copy(
    local: Connection,
    stream: Connection,
    half_close_native: bool,
    cancel: CancellationToken,
) {
    if half_close_native {
        tokio::spawn(forward(local, stream, cancel, Auditors::default()));
    } else {
        // 与客户端一侧对称：复用流缺少原生写关闭时叠加成帧包装。
        let stream = FramedStream::new(stream);
        tokio::spawn(forward(local, stream, cancel, Auditors::default()));
    }
}

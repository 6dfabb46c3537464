//! # client 模块说明
//!
//! ## 核心意图（Why）
//! - 把一条已建立的承载传输（SSH 通道、容器 exec 流、隧道）包装成
//!   满足端点契约的远端端点：构造时完成初始化握手，之后每次 `open()`
//!   对应一条复用流；
//! - 传输层故障经后台泵任务从复用器转交到端点的故障通道，控制器由此
//!   获知远端失联并进入重连循环。
//!
//! ## 行为契约（What）
//! - 构造步骤严格有序：包装复用器 → 初始化流握手 → 启动故障泵；任何
//!   一步失败都会拆除复用器（从而关闭承载传输）；
//! - `source = true` 时远端是监听方，`open()` 接受对端打开的流；否则
//!   `open()` 主动打开新流；
//! - 当复用器的流不原生支持写关闭时，返回的连接对称地叠加成帧包装。

use std::sync::Arc;

use async_trait::async_trait;
use ferry_core::{
    Configuration, Connection, Endpoint, EndpointError, Transport, TransportError,
    TransportErrors, Version, endpoint::transport_error_channel,
};
use ferry_mux::{FrameMux, Multiplexer, MuxError};
use ferry_stream::FramedStream;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::HandshakeError;
use crate::protocol::{
    InitializeForwardingRequest, InitializeForwardingResponse, receive_message, send_message,
};

/// 远端端点客户端。
///
/// # 教案式说明
/// - **契约 (What)**：实现 [`Endpoint`]；`shutdown()` 关闭复用器，既
///   终结全部在途流也释放承载传输；
/// - **风险 (Trade-offs)**：握手响应由远端生成，错误文本原样透传，
///   调用方不应假设其格式稳定。
pub struct RemoteEndpoint {
    mux: Arc<dyn Multiplexer>,
    source: bool,
    errors: TransportErrors,
}

impl RemoteEndpoint {
    /// 在承载传输上建立远端端点。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：
    ///   - `connection`：已建立的承载传输；
    ///   - `version` / `configuration` / `transport` / `address`：随
    ///     初始化请求发往远端；
    ///   - `source`：为真时远端作为监听方；
    /// - **前置条件**：调用方已完成地址文法校验；
    /// - **后置条件**：成功返回的端点已握手完毕且故障泵在位；失败时
    ///   承载传输已被关闭。
    pub async fn connect(
        connection: Connection,
        version: Version,
        configuration: Configuration,
        transport: Transport,
        address: String,
        source: bool,
    ) -> Result<RemoteEndpoint, HandshakeError> {
        let mux: Arc<dyn Multiplexer> = FrameMux::client(connection);

        let initialized = initialize(
            mux.as_ref(),
            version,
            configuration,
            transport,
            address,
            source,
        )
        .await;
        if let Err(error) = initialized {
            mux.shutdown().await;
            return Err(error);
        }

        // 故障泵：复用器拆除后把根因转交端点故障通道（至多一次）。
        let (reporter, errors) = transport_error_channel();
        let pump_mux = mux.clone();
        tokio::spawn(async move {
            pump_mux.closed().await;
            let root = pump_mux.internal_error().unwrap_or(MuxError::Closed);
            debug!(target: "ferry::remote", %root, "remote transport failed");
            reporter.report(TransportError::new(root.to_string()));
        });

        Ok(RemoteEndpoint {
            mux,
            source,
            errors,
        })
    }
}

async fn initialize(
    mux: &dyn Multiplexer,
    version: Version,
    configuration: Configuration,
    transport: Transport,
    address: String,
    source: bool,
) -> Result<(), HandshakeError> {
    let mut stream = mux.open_stream().await?;
    let request = InitializeForwardingRequest {
        version: version.number(),
        configuration,
        transport: transport.as_str().to_owned(),
        address,
        listener: source,
    };
    send_message(&mut stream, &request).await?;
    let response: InitializeForwardingResponse = receive_message(&mut stream).await?;
    if !response.error.is_empty() {
        return Err(HandshakeError::Rejected {
            message: response.error,
        });
    }
    let _ = stream.shutdown().await;
    Ok(())
}

#[async_trait]
impl Endpoint for RemoteEndpoint {
    async fn open(&self) -> Result<Connection, EndpointError> {
        let stream = if self.source {
            self.mux.accept_stream().await
        } else {
            self.mux.open_stream().await
        }
        .map_err(|error| EndpointError::Multiplexer {
            message: error.to_string(),
        })?;
        // 写关闭不原生时对称叠加成帧包装（远端服务侧采用相同判定）。
        if self.mux.half_close_native() {
            Ok(stream)
        } else {
            Ok(Box::new(FramedStream::new(stream)))
        }
    }

    fn transport_errors(&self) -> TransportErrors {
        self.errors.clone()
    }

    async fn shutdown(&self) {
        self.mux.shutdown().await;
    }
}

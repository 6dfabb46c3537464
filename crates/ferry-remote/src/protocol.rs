//! # protocol 模块说明
//!
//! ## 核心意图（Why）
//! - 定义初始化流上往返各一条的握手消息，以及"32 位大端长度前缀 +
//!   二进制载荷"的消息编码；
//! - 校验谓词集中在请求类型上：服务端与客户端共享同一份合法性判断。
//!
//! ## 行为契约（What）
//! - 请求合法当且仅当：版本受支持、配置通过校验、传输标签属于允许
//!   集合、地址非空；
//! - 解码侧以 1 MiB 上限拒绝异常长度，防止恶意对端诱导超额分配。

use ferry_core::{Configuration, ForwardingAddress, Transport, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HandshakeError;

/// 单条初始化消息的编码长度上限。
pub const MAX_MESSAGE_LENGTH: usize = 1 << 20;

/// 初始化请求：客户端 → 服务端。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitializeForwardingRequest {
    /// 会话协议版本（受支持当且仅当为 1）。
    pub version: u32,
    /// 套接字策略配置。
    pub configuration: Configuration,
    /// 传输标签（`tcp|tcp4|tcp6|unix|npipe`）。
    pub transport: String,
    /// 端点地址，非空。
    pub address: String,
    /// 为真时远端端点作为监听方。
    pub listener: bool,
}

impl InitializeForwardingRequest {
    /// 校验请求合法性。
    pub fn validate(&self) -> Result<(), HandshakeError> {
        if !Version::supported(self.version) {
            return Err(HandshakeError::UnsupportedVersion {
                version: self.version,
            });
        }
        self.configuration
            .validate()
            .map_err(HandshakeError::InvalidConfiguration)?;
        self.transport
            .parse::<Transport>()
            .map_err(HandshakeError::InvalidTransport)?;
        if self.address.is_empty() {
            return Err(HandshakeError::EmptyAddress);
        }
        Ok(())
    }

    /// 按请求字段构造端点地址（要求请求已通过校验）。
    pub fn forwarding_address(&self) -> Result<ForwardingAddress, HandshakeError> {
        let transport = self
            .transport
            .parse::<Transport>()
            .map_err(HandshakeError::InvalidTransport)?;
        Ok(ForwardingAddress {
            transport,
            address: self.address.clone(),
        })
    }
}

/// 初始化响应：服务端 → 客户端。`error` 为空表示接受。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeForwardingResponse {
    /// 拒绝原因；空串表示初始化成功。
    pub error: String,
}

/// 发送一条带长度前缀的初始化消息并冲刷。
pub async fn send_message<S, M>(stream: &mut S, message: &M) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
    M: Serialize,
{
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_MESSAGE_LENGTH {
        return Err(HandshakeError::MessageTooLarge {
            length: payload.len(),
        });
    }
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// 接收一条带长度前缀的初始化消息。
pub async fn receive_message<S, M>(stream: &mut S) -> Result<M, HandshakeError>
where
    S: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_MESSAGE_LENGTH {
        return Err(HandshakeError::MessageTooLarge { length });
    }
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::SocketOverwriteMode;

    fn request() -> InitializeForwardingRequest {
        InitializeForwardingRequest {
            version: 1,
            configuration: Configuration {
                socket_overwrite_mode: SocketOverwriteMode::Overwrite,
                ..Configuration::default()
            },
            transport: "tcp".to_owned(),
            address: "127.0.0.1:9000".to_owned(),
            listener: true,
        }
    }

    #[test]
    fn valid_request_passes_validation() {
        request().validate().expect("request is valid");
    }

    #[test]
    fn validation_rejects_each_illegal_field() {
        let mut bad_version = request();
        bad_version.version = 0;
        assert!(matches!(
            bad_version.validate(),
            Err(HandshakeError::UnsupportedVersion { version: 0 })
        ));

        let mut bad_configuration = request();
        bad_configuration.configuration.socket_permission_mode = 0o7777;
        assert!(matches!(
            bad_configuration.validate(),
            Err(HandshakeError::InvalidConfiguration(_))
        ));

        let mut bad_transport = request();
        bad_transport.transport = "udp".to_owned();
        assert!(matches!(
            bad_transport.validate(),
            Err(HandshakeError::InvalidTransport(_))
        ));

        let mut empty_transport = request();
        empty_transport.transport = String::new();
        assert!(matches!(
            empty_transport.validate(),
            Err(HandshakeError::InvalidTransport(_))
        ));

        let mut empty_address = request();
        empty_address.address = String::new();
        assert!(matches!(
            empty_address.validate(),
            Err(HandshakeError::EmptyAddress)
        ));
    }

    #[tokio::test]
    async fn messages_round_trip_over_a_stream() {
        let (mut left, mut right) = tokio::io::duplex(4096);

        let sent = request();
        send_message(&mut left, &sent).await.expect("send request");
        let received: InitializeForwardingRequest =
            receive_message(&mut right).await.expect("receive request");
        assert_eq!(received, sent);

        let response = InitializeForwardingResponse {
            error: "listener construction failed".to_owned(),
        };
        send_message(&mut right, &response)
            .await
            .expect("send response");
        let received: InitializeForwardingResponse =
            receive_message(&mut left).await.expect("receive response");
        assert_eq!(received, response);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut left, mut right) = tokio::io::duplex(64);
        let length = (MAX_MESSAGE_LENGTH as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut left, &length)
            .await
            .expect("inject length");

        let result: Result<InitializeForwardingRequest, _> = receive_message(&mut right).await;
        assert!(matches!(
            result,
            Err(HandshakeError::MessageTooLarge { .. })
        ));
    }
}

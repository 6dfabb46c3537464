//! 本地拨号端点。

use std::io;

use async_trait::async_trait;
use ferry_core::{
    Connection, Endpoint, EndpointError, ForwardingAddress, Transport, TransportErrorReporter,
    TransportErrors, endpoint::transport_error_channel,
};
use tokio::net::{TcpStream, lookup_host};
use tokio_util::sync::CancellationToken;

use crate::npipe;

/// 本地拨号端点：每次 `open()` 发起一条到固定地址的出站连接。
///
/// # 教案式说明
/// - **契约 (What)**：`shutdown()` 取消内部令牌，既中止在途拨号也让
///   后续 `open()` 立即返回 [`EndpointError::Shutdown`]；
/// - **风险 (Trade-offs)**：拨号没有内建超时，期限控制由上层的重连
///   循环与取消令牌承担。
pub struct LocalDialer {
    address: ForwardingAddress,
    cancel: CancellationToken,
    errors: TransportErrors,
    // 本地端点没有会失败的传输，持有发送端只为保持通道常开。
    _reporter: TransportErrorReporter,
}

impl LocalDialer {
    /// 构造指向给定地址的拨号端点。
    pub fn new(address: ForwardingAddress) -> LocalDialer {
        let (reporter, errors) = transport_error_channel();
        LocalDialer {
            address,
            cancel: CancellationToken::new(),
            errors,
            _reporter: reporter,
        }
    }
}

#[async_trait]
impl Endpoint for LocalDialer {
    async fn open(&self) -> Result<Connection, EndpointError> {
        if self.cancel.is_cancelled() {
            return Err(EndpointError::Shutdown);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(EndpointError::Shutdown),
            connection = dial(&self.address) => connection,
        }
    }

    fn transport_errors(&self) -> TransportErrors {
        self.errors.clone()
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn dial(address: &ForwardingAddress) -> Result<Connection, EndpointError> {
    match address.transport {
        Transport::Tcp => {
            let stream = TcpStream::connect(address.address.as_str()).await?;
            Ok(Box::new(stream))
        }
        Transport::Tcp4 => dial_tcp_family(&address.address, true).await,
        Transport::Tcp6 => dial_tcp_family(&address.address, false).await,
        Transport::Unix => dial_unix(&address.address).await,
        Transport::Npipe => npipe::dial(&address.address).await,
    }
}

/// 解析地址并只尝试指定地址族的候选。
async fn dial_tcp_family(address: &str, ipv4: bool) -> Result<Connection, EndpointError> {
    let candidates = lookup_host(address).await?;
    let mut last_error: Option<io::Error> = None;
    for candidate in candidates {
        if candidate.is_ipv4() != ipv4 {
            continue;
        }
        match TcpStream::connect(candidate).await {
            Ok(stream) => return Ok(Box::new(stream)),
            Err(error) => last_error = Some(error),
        }
    }
    Err(EndpointError::Open(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no address of the requested family",
        )
    })))
}

#[cfg(unix)]
async fn dial_unix(path: &str) -> Result<Connection, EndpointError> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn dial_unix(_path: &str) -> Result<Connection, EndpointError> {
    Err(EndpointError::Unsupported {
        transport: Transport::Unix.as_str().to_owned(),
    })
}

//! Windows 命名管道的平台分派。
//!
//! 非 Windows 平台上的两个入口都返回结构化的不支持错误，调用方不需
//! 要自行做平台判断。

#[cfg(not(windows))]
use ferry_core::Transport;
use ferry_core::{Connection, EndpointError};

#[cfg(windows)]
pub(crate) async fn dial(address: &str) -> Result<Connection, EndpointError> {
    use std::time::Duration;
    use tokio::net::windows::named_pipe::ClientOptions;

    // 服务端实例尚未就绪时以短间隔重试，与命名管道的忙等语义对齐。
    loop {
        match ClientOptions::new().open(address) {
            Ok(client) => return Ok(Box::new(client)),
            Err(error) if error.raw_os_error() == Some(231) => {
                // ERROR_PIPE_BUSY：所有实例都在握手中。
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(error) => return Err(EndpointError::Open(error)),
        }
    }
}

#[cfg(not(windows))]
pub(crate) async fn dial(_address: &str) -> Result<Connection, EndpointError> {
    Err(EndpointError::Unsupported {
        transport: Transport::Npipe.as_str().to_owned(),
    })
}

/// 命名管道监听器：每次接受后立即补一个新的服务端实例。
#[cfg(windows)]
pub(crate) struct NpipeListener {
    address: String,
    next: tokio::sync::Mutex<Option<tokio::net::windows::named_pipe::NamedPipeServer>>,
}

#[cfg(windows)]
impl NpipeListener {
    pub(crate) fn bind(address: &str) -> std::io::Result<NpipeListener> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let first = ServerOptions::new()
            .first_pipe_instance(true)
            .create(address)?;
        Ok(NpipeListener {
            address: address.to_owned(),
            next: tokio::sync::Mutex::new(Some(first)),
        })
    }

    pub(crate) async fn accept(&self) -> std::io::Result<Connection> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let mut slot = self.next.lock().await;
        let server = match slot.take() {
            Some(server) => server,
            None => ServerOptions::new().create(&self.address)?,
        };
        server.connect().await?;
        *slot = Some(ServerOptions::new().create(&self.address)?);
        Ok(Box::new(server))
    }
}

/// 非 Windows 平台的监听路径在创建入口即被拒绝，这里无需监听器类型。
#[cfg(not(windows))]
pub(crate) fn unsupported() -> EndpointError {
    EndpointError::Unsupported {
        transport: Transport::Npipe.as_str().to_owned(),
    }
}

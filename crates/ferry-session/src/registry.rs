//! # registry 模块说明
//!
//! ## 核心意图（Why）
//! - 以 URL 协议标签为键的进程级处理器表：本地协议随核心安装，远端
//!   协议（SSH、容器、隧道）由外部传输处理器在进程启动阶段注册；
//! - 注册在启动阶段完成，之后只读——会话控制器在每个重连周期经
//!   [`connect`] 装配端点。
//!
//! ## 行为契约（What）
//! - 本地处理器拒绝携带环境变量/参数的 URL，并以惰性模式装配监听
//!   端点；
//! - [`connect_remote`] 是远端处理器的公共骨架：承载拨号与取消令牌
//!   竞速，取消时丢弃已拨出的承载连接，随后交给远端端点客户端完成
//!   握手。

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use ferry_core::{
    Configuration, Connection, Endpoint, Prompter, Protocol, Transport, Url, Version,
};
use ferry_remote::RemoteEndpoint;
use ferry_transport_local::{LocalDialer, LocalListener};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectError;

/// 协议处理器契约：把转发 URL 装配成已连接的端点。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `token`：装配必须可被中止；
///   - `session` / `version` / `configuration`：会话标识、协议版本与
///     已合并的端侧生效配置；
///   - `source`：为真时装配监听方端点；
/// - **风险 (Trade-offs)**：处理器返回的端点由控制器独占，实现不得
///   在多个会话间共享端点实例。
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// 装配一个已连接的端点。
    async fn connect(
        &self,
        token: &CancellationToken,
        url: &Url,
        prompter: Option<&dyn Prompter>,
        session: &str,
        version: Version,
        configuration: &Configuration,
        source: bool,
    ) -> Result<Box<dyn Endpoint>, ConnectError>;
}

static HANDLERS: LazyLock<RwLock<HashMap<Protocol, Arc<dyn ProtocolHandler>>>> =
    LazyLock::new(|| {
        let mut handlers: HashMap<Protocol, Arc<dyn ProtocolHandler>> = HashMap::new();
        handlers.insert(Protocol::Local, Arc::new(LocalHandler));
        RwLock::new(handlers)
    });

/// 注册一个协议处理器（进程启动阶段调用，覆盖同名协议）。
pub fn register(protocol: Protocol, handler: Arc<dyn ProtocolHandler>) {
    HANDLERS.write().insert(protocol, handler);
}

/// 按 URL 协议分派端点装配。
pub async fn connect(
    token: &CancellationToken,
    url: &Url,
    prompter: Option<&dyn Prompter>,
    session: &str,
    version: Version,
    configuration: &Configuration,
    source: bool,
) -> Result<Box<dyn Endpoint>, ConnectError> {
    let handler = HANDLERS.read().get(&url.protocol).cloned();
    let Some(handler) = handler else {
        return Err(ConnectError::UnknownProtocol {
            protocol: url.protocol.to_string(),
        });
    };
    handler
        .connect(token, url, prompter, session, version, configuration, source)
        .await
}

/// 远端处理器骨架：拨出承载传输并建立远端端点。
///
/// # 教案式注释
/// - **契约 (What)**：`carrier` 为传输特定的承载拨号 future（SSH 通道、
///   容器 exec、隧道穿越）；取消令牌触发时放弃拨号并丢弃已建立的
///   承载连接；
/// - **后置条件**：成功返回的端点已完成初始化握手。
pub async fn connect_remote<F>(
    token: &CancellationToken,
    carrier: F,
    version: Version,
    configuration: &Configuration,
    transport: Transport,
    address: String,
    source: bool,
) -> Result<Box<dyn Endpoint>, ConnectError>
where
    F: Future<Output = std::io::Result<Connection>> + Send,
{
    let connection = tokio::select! {
        _ = token.cancelled() => return Err(ConnectError::Cancelled),
        connection = carrier => connection.map_err(|error| ConnectError::Remote {
            message: error.to_string(),
        })?,
    };
    let endpoint = tokio::select! {
        _ = token.cancelled() => return Err(ConnectError::Cancelled),
        endpoint = RemoteEndpoint::connect(
            connection,
            version,
            configuration.clone(),
            transport,
            address,
            source,
        ) => endpoint.map_err(|error| ConnectError::Remote {
            message: error.to_string(),
        })?,
    };
    Ok(Box::new(endpoint))
}

/// 本地协议处理器。
struct LocalHandler;

#[async_trait]
impl ProtocolHandler for LocalHandler {
    async fn connect(
        &self,
        token: &CancellationToken,
        url: &Url,
        _prompter: Option<&dyn Prompter>,
        _session: &str,
        version: Version,
        configuration: &Configuration,
        source: bool,
    ) -> Result<Box<dyn Endpoint>, ConnectError> {
        if !url.environment.is_empty() || !url.parameters.is_empty() {
            return Err(ConnectError::LocalUrlExtras);
        }
        let address = url.forwarding_address()?;
        if source {
            let listener = tokio::select! {
                _ = token.cancelled() => return Err(ConnectError::Cancelled),
                listener = LocalListener::new(version, configuration.clone(), address, true) => {
                    listener?
                }
            };
            Ok(Box::new(listener))
        } else {
            Ok(Box::new(LocalDialer::new(address)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::EndpointError;

    #[tokio::test]
    async fn local_handler_rejects_urls_with_extras() {
        let mut url = Url::local("tcp:127.0.0.1:0");
        url.environment
            .insert("FERRY_TEST".to_owned(), "1".to_owned());
        let result = connect(
            &CancellationToken::new(),
            &url,
            None,
            "fwds_test",
            Version::V1,
            &Configuration::default(),
            true,
        )
        .await;
        assert!(matches!(result, Err(ConnectError::LocalUrlExtras)));
    }

    #[tokio::test]
    async fn local_listener_endpoints_are_lazy() {
        // 惰性装配：即使地址无法绑定，装配本身也会成功，失败推迟到
        // 首次 open()。
        let url = Url::local("tcp:256.256.256.256:0");
        let endpoint = connect(
            &CancellationToken::new(),
            &url,
            None,
            "fwds_test",
            Version::V1,
            &Configuration::default(),
            true,
        )
        .await
        .expect("lazy assembly succeeds");
        assert!(matches!(
            endpoint.open().await,
            Err(EndpointError::ListenerInit { .. })
        ));
    }

    #[tokio::test]
    async fn unregistered_protocols_are_rejected() {
        let url = Url {
            protocol: Protocol::Tunnel,
            path: "tcp:remote:80".to_owned(),
            ..Url::default()
        };
        let result = connect(
            &CancellationToken::new(),
            &url,
            None,
            "fwds_test",
            Version::V1,
            &Configuration::default(),
            false,
        )
        .await;
        assert!(matches!(
            result,
            Err(ConnectError::UnknownProtocol { .. })
        ));
    }
}

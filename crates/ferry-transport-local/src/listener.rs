//! # listener 模块说明
//!
//! ## 核心意图（Why）
//! - 本地监听端点覆盖五种传输，统一呈现"初始化 → 接受循环 → 关闭"
//!   生命周期；
//! - 惰性初始化把底层监听器的创建推迟到首次 `open()`：源端监听器可以
//!   先行占位，等目的端连通后再真正绑定。
//!
//! ## 行为契约（What）
//! - 初始化结果（成功 / 失败 / 已关闭）经一次性单元固化：失败在每次
//!   后续 `open()` 上重放，`shutdown()` 对未初始化的监听器写入关闭
//!   哨兵；
//! - Unix 绑定冲突按生效覆盖策略处理：非 `Overwrite` 直接失败，
//!   `Overwrite` 删除冲突路径后重试一次；
//! - 绑定成功的 Unix 套接字随后应用属主/属组/权限，失败时关闭监听器
//!   并移除路径。

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use ferry_core::{
    Configuration, Connection, Endpoint, EndpointError, ForwardingAddress, SocketOverwriteMode,
    Transport, TransportErrorReporter, TransportErrors, Version,
    endpoint::transport_error_channel,
};
use parking_lot::Mutex;
use tokio::net::{TcpListener, lookup_host};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::npipe;
#[cfg(unix)]
use crate::socket;

/// 一次性初始化的固化结果。
#[derive(Clone, Debug)]
enum InitOutcome {
    /// 监听器已就绪。
    Ready,
    /// 创建或配置失败；消息在后续 `open()` 上重放。
    Failed(String),
    /// 监听器在初始化前即被关闭。
    Shutdown,
}

/// 底层监听器的平台变体。
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: std::path::PathBuf,
    },
    #[cfg(windows)]
    Npipe(npipe::NpipeListener),
}

impl ListenerKind {
    async fn accept(&self) -> io::Result<Connection> {
        match self {
            ListenerKind::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            ListenerKind::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            #[cfg(windows)]
            ListenerKind::Npipe(listener) => listener.accept().await,
        }
    }
}

/// 本地监听端点。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `open()` 接受下一条入站连接；初始化失败或端点已关闭时返回
///     对应错误；
///   - `shutdown()` 幂等：取消令牌解除阻塞中的接受，监听器被释放，
///     Unix 套接字路径被移除；
/// - **执行 (How)**：初始化经 [`OnceCell`] 串行化，接受经取消令牌与
///   `select!` 组合，监听器本体以 `Arc` 短暂出借给在途接受；
/// - **风险 (Trade-offs)**：惰性模式下第一条连接要为绑定买单，若绑定
///   注定失败，失败要等到首次 `open()` 才暴露。
pub struct LocalListener {
    version: Version,
    configuration: Configuration,
    address: ForwardingAddress,
    init: OnceCell<InitOutcome>,
    listener: Mutex<Option<Arc<ListenerKind>>>,
    cancel: CancellationToken,
    errors: TransportErrors,
    // 本地端点没有会失败的传输，持有发送端只为保持通道常开。
    _reporter: TransportErrorReporter,
}

impl LocalListener {
    /// 构造监听端点；`lazy = false`（或惰性被进程级开关禁用）时在此
    /// 同步完成底层监听器创建。
    pub async fn new(
        version: Version,
        configuration: Configuration,
        address: ForwardingAddress,
        lazy: bool,
    ) -> Result<LocalListener, EndpointError> {
        let (reporter, errors) = transport_error_channel();
        let listener = LocalListener {
            version,
            configuration,
            address,
            init: OnceCell::new(),
            listener: Mutex::new(None),
            cancel: CancellationToken::new(),
            errors,
            _reporter: reporter,
        };
        let lazy = lazy && !crate::lazy_listener_initialization_disabled();
        if !lazy {
            let outcome = listener
                .init
                .get_or_init(|| listener.initialize())
                .await
                .clone();
            match outcome {
                InitOutcome::Ready => {}
                InitOutcome::Failed(message) => {
                    return Err(EndpointError::ListenerInit { message });
                }
                InitOutcome::Shutdown => return Err(EndpointError::Shutdown),
            }
        }
        Ok(listener)
    }

    /// 已绑定 TCP 监听器的实际地址（测试与诊断用）。
    pub fn local_address(&self) -> Option<std::net::SocketAddr> {
        match self.listener.lock().as_deref() {
            Some(ListenerKind::Tcp(listener)) => listener.local_addr().ok(),
            _ => None,
        }
    }

    async fn initialize(&self) -> InitOutcome {
        match create_listener(&self.address, &self.configuration, self.version).await {
            Ok(kind) => {
                *self.listener.lock() = Some(Arc::new(kind));
                InitOutcome::Ready
            }
            Err(error) => InitOutcome::Failed(error.to_string()),
        }
    }
}

#[async_trait]
impl Endpoint for LocalListener {
    async fn open(&self) -> Result<Connection, EndpointError> {
        let outcome = self.init.get_or_init(|| self.initialize()).await.clone();
        match outcome {
            InitOutcome::Ready => {}
            InitOutcome::Failed(message) => {
                return Err(EndpointError::ListenerInit { message });
            }
            InitOutcome::Shutdown => return Err(EndpointError::Shutdown),
        }
        if self.cancel.is_cancelled() {
            return Err(EndpointError::Shutdown);
        }
        let listener = self.listener.lock().clone();
        let Some(listener) = listener else {
            return Err(EndpointError::Shutdown);
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(EndpointError::Shutdown),
            accepted = listener.accept() => Ok(accepted?),
        }
    }

    fn transport_errors(&self) -> TransportErrors {
        self.errors.clone()
    }

    async fn shutdown(&self) {
        // 对从未初始化的惰性监听器，这一步把一次性初始化原子地变成
        // 关闭哨兵；已初始化（含失败）的结果保持不变。
        let _ = self
            .init
            .get_or_init(|| async { InitOutcome::Shutdown })
            .await;
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        #[cfg(unix)]
        if let Some(listener) = &listener {
            if let ListenerKind::Unix { path, .. } = listener.as_ref() {
                let _ = std::fs::remove_file(path);
            }
        }
        drop(listener);
    }
}

/// 监听器创建算法：平台分派、冲突处理与套接字策略应用。
async fn create_listener(
    address: &ForwardingAddress,
    configuration: &Configuration,
    version: Version,
) -> Result<ListenerKind, EndpointError> {
    match address.transport {
        Transport::Npipe => {
            #[cfg(windows)]
            {
                let listener = npipe::NpipeListener::bind(&address.address).map_err(|error| {
                    EndpointError::listener_init(format!(
                        "unable to create named pipe listener: {error}"
                    ))
                })?;
                return Ok(ListenerKind::Npipe(listener));
            }
            #[cfg(not(windows))]
            return Err(npipe::unsupported());
        }
        #[cfg(not(unix))]
        Transport::Unix => {
            return Err(EndpointError::Unsupported {
                transport: Transport::Unix.as_str().to_owned(),
            });
        }
        _ => {}
    }

    match listen(address).await {
        Ok(kind) => finalize(kind, configuration, version),
        Err(error) => {
            let conflicting = matches!(
                error.kind(),
                io::ErrorKind::AddrInUse | io::ErrorKind::AlreadyExists
            );
            if address.transport != Transport::Unix || !conflicting {
                return Err(EndpointError::listener_init(format!(
                    "unable to create listener: {error}"
                )));
            }
            let overwrite = if configuration.socket_overwrite_mode.is_default() {
                version.default_socket_overwrite_mode()
            } else {
                configuration.socket_overwrite_mode
            };
            if overwrite != SocketOverwriteMode::Overwrite {
                return Err(EndpointError::listener_init(format!(
                    "conflicting socket exists: {error}"
                )));
            }
            tracing::debug!(
                target: "ferry::transport::local",
                path = %address.address,
                "removing conflicting socket before rebinding"
            );
            std::fs::remove_file(&address.address).map_err(|error| {
                EndpointError::listener_init(format!(
                    "unable to remove conflicting socket: {error}"
                ))
            })?;
            match listen(address).await {
                Ok(kind) => finalize(kind, configuration, version),
                Err(error) => Err(EndpointError::listener_init(format!(
                    "unable to create listener after socket removal: {error}"
                ))),
            }
        }
    }
}

/// 对刚绑定的监听器应用 Unix 套接字策略。
fn finalize(
    kind: ListenerKind,
    configuration: &Configuration,
    version: Version,
) -> Result<ListenerKind, EndpointError> {
    #[cfg(unix)]
    if let ListenerKind::Unix { path, .. } = &kind {
        if let Err(error) = socket::apply_socket_policy(path, configuration, version) {
            let _ = std::fs::remove_file(path);
            return Err(EndpointError::listener_init(format!(
                "unable to configure socket ownership and permissions: {error}"
            )));
        }
    }
    #[cfg(not(unix))]
    let _ = (configuration, version);
    Ok(kind)
}

async fn listen(address: &ForwardingAddress) -> io::Result<ListenerKind> {
    match address.transport {
        Transport::Tcp => Ok(ListenerKind::Tcp(
            TcpListener::bind(address.address.as_str()).await?,
        )),
        Transport::Tcp4 => Ok(ListenerKind::Tcp(
            bind_tcp_family(&address.address, true).await?,
        )),
        Transport::Tcp6 => Ok(ListenerKind::Tcp(
            bind_tcp_family(&address.address, false).await?,
        )),
        #[cfg(unix)]
        Transport::Unix => {
            let path = std::path::PathBuf::from(&address.address);
            let listener = tokio::net::UnixListener::bind(&path)?;
            Ok(ListenerKind::Unix { listener, path })
        }
        // 不可用的平台组合在创建入口已被拒绝。
        #[cfg(not(unix))]
        Transport::Unix => unreachable!("unix transport rejected before listen"),
        Transport::Npipe => unreachable!("npipe transport dispatched before listen"),
    }
}

/// 解析地址并绑定首个匹配地址族的候选。
async fn bind_tcp_family(address: &str, ipv4: bool) -> io::Result<TcpListener> {
    let candidates = lookup_host(address).await?;
    let mut last_error: Option<io::Error> = None;
    for candidate in candidates {
        if candidate.is_ipv4() != ipv4 {
            continue;
        }
        match TcpListener::bind(candidate).await {
            Ok(listener) => return Ok(listener),
            Err(error) => last_error = Some(error),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no address of the requested family",
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// 串行化依赖进程级惰性开关的测试。
    static LAZY_FLAG_GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn tcp_any() -> ForwardingAddress {
        ForwardingAddress {
            transport: Transport::Tcp,
            address: "127.0.0.1:0".to_owned(),
        }
    }

    #[tokio::test]
    async fn eager_tcp_listener_accepts_connections() {
        let listener = LocalListener::new(
            Version::V1,
            Configuration::default(),
            tcp_any(),
            false,
        )
        .await
        .expect("create listener");
        let target = listener.local_address().expect("bound address");

        let (accepted, dialed) = tokio::join!(
            listener.open(),
            tokio::net::TcpStream::connect(target)
        );
        let mut accepted = accepted.expect("accept succeeds");
        let mut dialed = dialed.expect("dial succeeds");

        dialed.write_all(b"hi").await.expect("client write");
        let mut buffer = [0u8; 2];
        accepted.read_exact(&mut buffer).await.expect("server read");
        assert_eq!(&buffer, b"hi");

        listener.shutdown().await;
        assert!(matches!(
            listener.open().await,
            Err(EndpointError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn shutdown_unblocks_a_pending_accept() {
        let listener = std::sync::Arc::new(
            LocalListener::new(Version::V1, Configuration::default(), tcp_any(), false)
                .await
                .expect("create listener"),
        );
        let opener = listener.clone();
        let pending = tokio::spawn(async move { opener.open().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        listener.shutdown().await;
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), pending)
            .await
            .expect("open returns after shutdown")
            .expect("task completes");
        assert!(matches!(result, Err(EndpointError::Shutdown)));
    }

    #[tokio::test]
    async fn lazy_listener_poisoned_by_shutdown_before_open() {
        let _guard = LAZY_FLAG_GUARD.lock().expect("flag guard");
        let listener = LocalListener::new(
            Version::V1,
            Configuration::default(),
            tcp_any(),
            true,
        )
        .await
        .expect("create lazy listener");
        listener.shutdown().await;
        assert!(matches!(
            listener.open().await,
            Err(EndpointError::Shutdown)
        ));
    }

    #[cfg(unix)]
    mod unix_sockets {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn unix_address(path: &std::path::Path) -> ForwardingAddress {
            ForwardingAddress {
                transport: Transport::Unix,
                address: path.to_string_lossy().into_owned(),
            }
        }

        #[tokio::test]
        async fn overwrite_mode_replaces_a_stale_socket_path() {
            let directory = tempfile::tempdir().expect("temporary directory");
            let path = directory.path().join("stale.sock");
            std::fs::write(&path, b"stale").expect("pre-create regular file");

            let configuration = Configuration {
                socket_overwrite_mode: SocketOverwriteMode::Overwrite,
                ..Configuration::default()
            };
            let listener =
                LocalListener::new(Version::V1, configuration, unix_address(&path), false)
                    .await
                    .expect("overwrite replaces the stale path");

            // 旧的普通文件已被移除，路径现在是活的套接字。
            let metadata = std::fs::metadata(&path).expect("socket metadata");
            assert_ne!(metadata.len(), 5, "stale file content must be gone");
            listener.shutdown().await;
            assert!(!path.exists(), "shutdown removes the socket path");
        }

        #[tokio::test]
        async fn leave_mode_rejects_a_conflicting_socket() {
            let directory = tempfile::tempdir().expect("temporary directory");
            let path = directory.path().join("conflicting.sock");
            std::fs::write(&path, b"stale").expect("pre-create regular file");

            let configuration = Configuration {
                socket_overwrite_mode: SocketOverwriteMode::Leave,
                ..Configuration::default()
            };
            let error =
                LocalListener::new(Version::V1, configuration, unix_address(&path), false)
                    .await
                    .err()
                    .expect("leave mode must fail");
            assert!(matches!(error, EndpointError::ListenerInit { .. }));
            assert!(path.exists(), "conflicting path must be left in place");
        }

        #[tokio::test]
        async fn default_mode_follows_the_version_default() {
            // 版本 1 的默认策略是 Leave，冲突必须失败。
            let directory = tempfile::tempdir().expect("temporary directory");
            let path = directory.path().join("default.sock");
            std::fs::write(&path, b"stale").expect("pre-create regular file");

            let error = LocalListener::new(
                Version::V1,
                Configuration::default(),
                unix_address(&path),
                false,
            )
            .await
            .err()
            .expect("default mode resolves to leave");
            assert!(matches!(error, EndpointError::ListenerInit { .. }));
        }

        #[tokio::test]
        async fn permission_mode_is_applied_to_the_socket() {
            let directory = tempfile::tempdir().expect("temporary directory");
            let path = directory.path().join("mode.sock");

            let configuration = Configuration {
                socket_permission_mode: 0o660,
                ..Configuration::default()
            };
            let listener =
                LocalListener::new(Version::V1, configuration, unix_address(&path), false)
                    .await
                    .expect("create unix listener");

            let metadata = std::fs::metadata(&path).expect("socket metadata");
            assert_eq!(metadata.permissions().mode() & 0o777, 0o660);
            listener.shutdown().await;
        }

        #[tokio::test]
        async fn default_permission_mode_comes_from_the_version() {
            let directory = tempfile::tempdir().expect("temporary directory");
            let path = directory.path().join("default-mode.sock");

            let listener = LocalListener::new(
                Version::V1,
                Configuration::default(),
                unix_address(&path),
                false,
            )
            .await
            .expect("create unix listener");

            let metadata = std::fs::metadata(&path).expect("socket metadata");
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
            listener.shutdown().await;
        }

        #[tokio::test]
        async fn lazy_initialization_failure_replays_on_every_open() {
            let _guard = super::LAZY_FLAG_GUARD.lock().expect("flag guard");
            let directory = tempfile::tempdir().expect("temporary directory");
            let path = directory.path().join("replay.sock");
            std::fs::write(&path, b"stale").expect("pre-create regular file");

            let listener = LocalListener::new(
                Version::V1,
                Configuration::default(),
                unix_address(&path),
                true,
            )
            .await
            .expect("lazy construction defers the failure");

            let first = listener.open().await.err().expect("first open fails");
            let second = listener.open().await.err().expect("second open fails");
            assert!(matches!(first, EndpointError::ListenerInit { .. }));
            assert_eq!(first.to_string(), second.to_string());
        }

        #[tokio::test]
        async fn disabling_lazy_initialization_forces_eager_binding() {
            let _guard = super::LAZY_FLAG_GUARD.lock().expect("flag guard");
            crate::disable_lazy_listener_initialization(true);
            let directory = tempfile::tempdir().expect("temporary directory");
            let path = directory.path().join("forced.sock");
            std::fs::write(&path, b"stale").expect("pre-create regular file");

            let result = LocalListener::new(
                Version::V1,
                Configuration::default(),
                unix_address(&path),
                true,
            )
            .await;
            crate::disable_lazy_listener_initialization(false);
            assert!(
                matches!(result, Err(EndpointError::ListenerInit { .. })),
                "with lazy disabled the failure must surface at construction"
            );
        }
    }
}

//! 远端端点两侧的端到端行为：握手、双向转发与半关闭传播。
//!
//! 所有场景都运行在内存双工管道上，服务端以 [`ferry_remote::serve`]
//! 驱动，客户端经 [`ferry_remote::RemoteEndpoint`] 装配。

use ferry_core::{Configuration, Endpoint, Transport, Version};
use ferry_mux::{FrameMux, Multiplexer};
use ferry_remote::{
    HandshakeError, InitializeForwardingRequest, InitializeForwardingResponse, RemoteEndpoint,
    protocol,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

#[tokio::test(flavor = "multi_thread")]
#[cfg(unix)]
async fn remote_listener_forwards_local_unix_connections() {
    let directory = tempfile::tempdir().expect("temporary directory");
    let socket_path = directory.path().join("agent.sock");

    let (client_side, server_side) = duplex(1 << 16);
    let server = tokio::spawn(ferry_remote::serve(Box::new(server_side)));

    let endpoint = RemoteEndpoint::connect(
        Box::new(client_side),
        Version::V1,
        Configuration::default(),
        Transport::Unix,
        socket_path.to_string_lossy().into_owned(),
        true,
    )
    .await
    .expect("handshake succeeds");

    // 握手返回时远端监听器已绑定，本地客户端可以立即拨号。
    let mut local = tokio::net::UnixStream::connect(&socket_path)
        .await
        .expect("dial the agent socket");
    local.write_all(b"hello").await.expect("local write");
    local.shutdown().await.expect("local close write");

    let mut connection = endpoint.open().await.expect("accept forwarded stream");
    let mut received = Vec::new();
    connection
        .read_to_end(&mut received)
        .await
        .expect("read until propagated EOF");
    assert_eq!(received, b"hello");

    // 反方向照常可用：写关闭只终结了一个方向。
    connection.write_all(b"world").await.expect("remote write");
    connection.shutdown().await.expect("remote close write");
    let mut reply = Vec::new();
    local.read_to_end(&mut reply).await.expect("local read");
    assert_eq!(reply, b"world");

    endpoint.shutdown().await;
    let _ = server.await.expect("server task");
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_dialer_pairs_streams_with_local_dials() {
    // 本地回显服务充当拨号目标。
    let echo = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind echo listener");
    let echo_address = echo.local_addr().expect("echo address").to_string();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = echo.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    let (client_side, server_side) = duplex(1 << 16);
    let server = tokio::spawn(ferry_remote::serve(Box::new(server_side)));

    let endpoint = RemoteEndpoint::connect(
        Box::new(client_side),
        Version::V1,
        Configuration::default(),
        Transport::Tcp,
        echo_address,
        false,
    )
    .await
    .expect("handshake succeeds");

    let mut connection = endpoint.open().await.expect("open forwarded stream");
    connection.write_all(b"ping").await.expect("write request");
    let mut buffer = [0u8; 4];
    connection.read_exact(&mut buffer).await.expect("read echo");
    assert_eq!(&buffer, b"ping");

    connection.shutdown().await.expect("close write");
    let mut rest = Vec::new();
    connection.read_to_end(&mut rest).await.expect("drain EOF");
    assert!(rest.is_empty());

    endpoint.shutdown().await;
    let _ = server.await.expect("server task");
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_version_surfaces_in_the_response() {
    let (client_side, server_side) = duplex(1 << 16);
    let server = tokio::spawn(ferry_remote::serve(Box::new(server_side)));

    // 以原始协议对话，发送服务端必须拒绝的版本号。
    let mux = FrameMux::client(Box::new(client_side));
    let mut stream = mux.open_stream().await.expect("open init stream");
    let request = InitializeForwardingRequest {
        version: 0,
        configuration: Configuration::default(),
        transport: "tcp".to_owned(),
        address: "x:1".to_owned(),
        listener: false,
    };
    protocol::send_message(&mut stream, &request)
        .await
        .expect("send request");
    let response: InitializeForwardingResponse = protocol::receive_message(&mut stream)
        .await
        .expect("receive response");
    assert!(
        response.error.contains("version"),
        "response must name the version rejection: {response:?}"
    );

    let served = server.await.expect("server task");
    assert!(matches!(
        served,
        Err(HandshakeError::UnsupportedVersion { version: 0 })
    ));
    mux.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn construction_failure_is_reported_to_the_client() {
    let (client_side, server_side) = duplex(1 << 16);
    let server = tokio::spawn(ferry_remote::serve(Box::new(server_side)));

    // 指向不存在目录的 unix 监听器无法绑定，远端应拒绝初始化。
    let result = RemoteEndpoint::connect(
        Box::new(client_side),
        Version::V1,
        Configuration::default(),
        Transport::Unix,
        "/nonexistent-ferry-directory/agent.sock".to_owned(),
        true,
    )
    .await;
    assert!(matches!(result, Err(HandshakeError::Rejected { .. })));
    let _ = server.await.expect("server task");
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_teardown_reaches_the_error_channel() {
    let echo = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind placeholder listener");
    let target = echo.local_addr().expect("listener address").to_string();

    let (client_side, server_side) = duplex(1 << 16);
    let server = tokio::spawn(ferry_remote::serve(Box::new(server_side)));

    let endpoint = RemoteEndpoint::connect(
        Box::new(client_side),
        Version::V1,
        Configuration::default(),
        Transport::Tcp,
        target,
        false,
    )
    .await
    .expect("handshake succeeds");

    let errors = endpoint.transport_errors();
    endpoint.shutdown().await;
    let failure = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        errors.failed(),
    )
    .await
    .expect("failure is delivered");
    assert!(failure.message().contains("closed"));
    let _ = server.await.expect("server task");
}

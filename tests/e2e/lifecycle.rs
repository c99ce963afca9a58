//! Start/stop behaviour of the tunnel server.

use super::common::{is_port_in_use, refused_addr, EchoServer};
use super::{start_tunnel, WAIT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tunnel::{TunnelConfig, TunnelError, TunnelServer};

#[tokio::test]
async fn test_stop_right_after_start_releases_port() {
    let (mut server, addr) = start_tunnel(refused_addr()).await;
    server.stop().await.unwrap();
    assert!(!is_port_in_use(addr.port()));

    // The same port can be bound again straight away.
    let config = TunnelConfig::new(refused_addr()).with_listen(addr);
    let mut again = TunnelServer::new(config);
    again.start().await.unwrap();
    assert_eq!(again.local_addr(), Some(addr));
    again.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_refuses_new_connections() {
    let echo = EchoServer::start().await;
    let (mut server, addr) = start_tunnel(echo.addr).await;
    server.stop().await.unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_stop_leaves_live_sessions_alone() {
    let echo = EchoServer::start().await;
    let (mut server, addr) = start_tunnel(echo.addr).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"before").await.unwrap();
    let mut buf = [0u8; 6];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();

    server.stop().await.unwrap();

    client.write_all(b"after!").await.unwrap();
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"after!");
}

#[tokio::test]
async fn test_restart_same_server() {
    let echo = EchoServer::start().await;
    let (mut server, _) = start_tunnel(echo.addr).await;
    server.stop().await.unwrap();

    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"again").await.unwrap();
    let mut buf = [0u8; 5];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"again");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (mut server, _) = start_tunnel(refused_addr()).await;
    server.stop().await.unwrap();
    server.stop().await.unwrap();
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_bind_error_surfaces_from_start() {
    let (mut first, addr) = start_tunnel(refused_addr()).await;

    let mut second = TunnelServer::new(TunnelConfig::new(refused_addr()).with_listen(addr));
    assert!(matches!(
        second.start().await,
        Err(TunnelError::Bind { .. })
    ));
    assert!(!second.is_running());

    first.stop().await.unwrap();
}

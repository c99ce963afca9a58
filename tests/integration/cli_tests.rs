//! Drive the compiled binary the way a deployment would.

use super::common::{
    find_available_port, refused_addr, spawn_blocking_echo_server, wait_for_port,
    wait_for_port_closed,
};
use ntest::timeout;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

fn binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ssh-tunnel"));
    // Keep the environment from leaking into the template.
    cmd.env_remove("KUBE_NAMESPACE")
        .env_remove("KUBE_DOMAIN")
        .env_remove("SSH_TUNNEL_LISTEN")
        .env_remove("SSH_TUNNEL_UPSTREAM")
        .env_remove("RUST_LOG");
    cmd
}

fn run_to_completion(args: &[&str]) -> Output {
    binary()
        .args(args)
        .output()
        .expect("Failed to run ssh-tunnel")
}

fn spawn_tunnel(listen_port: u16, upstream: SocketAddr) -> Child {
    binary()
        .arg("--listen")
        .arg(format!("127.0.0.1:{listen_port}"))
        .arg("--upstream")
        .arg(upstream.to_string())
        .arg("--log-format")
        .arg("compact")
        .arg("--color")
        .arg("never")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start ssh-tunnel")
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    unsafe {
        libc::kill(child.id() as i32, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = child.kill();
}

#[test]
fn test_help_mentions_options() {
    let output = run_to_completion(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--listen", "--upstream", "--namespace", "--domain", "--log-format"] {
        assert!(stdout.contains(flag), "--help is missing {flag}");
    }
}

#[test]
fn test_version() {
    let output = run_to_completion(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_listen_address_is_rejected() {
    let output = run_to_completion(&["--listen", "nope"]);
    assert!(!output.status.success());
}

#[test]
#[timeout(20000)]
fn test_bind_failure_exits_with_error() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let output = run_to_completion(&[
        "--listen",
        &addr.to_string(),
        "--upstream",
        &refused_addr().to_string(),
        "--color",
        "never",
    ]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
#[timeout(20000)]
fn test_forwards_traffic_and_shuts_down_cleanly() {
    let upstream = spawn_blocking_echo_server();
    let port = find_available_port();
    let mut child = spawn_tunnel(port, upstream);

    assert!(
        wait_for_port(port, Duration::from_secs(5)),
        "tunnel never started listening"
    );

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(b"hello").unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    drop(stream);

    terminate(&mut child);
    let status = child.wait().expect("Failed to wait for ssh-tunnel");

    assert!(
        wait_for_port_closed(port, Duration::from_secs(5)),
        "port still open after shutdown"
    );
    #[cfg(unix)]
    assert!(status.success(), "unexpected exit status: {status:?}");
    #[cfg(not(unix))]
    let _ = status;
}

#[test]
#[timeout(20000)]
fn test_template_upstream_from_environment() {
    // Nothing resolves under .invalid, so every session fails to dial and
    // the client is hung up on, while the tunnel itself stays up.
    let port = find_available_port();
    let mut child = binary()
        .env("KUBE_NAMESPACE", "test")
        .env("KUBE_DOMAIN", "invalid")
        .arg("--listen")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--dial-timeout-ms")
        .arg("2000")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start ssh-tunnel");

    assert!(wait_for_port(port, Duration::from_secs(5)));

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let mut buf = [0u8; 16];
    let closed = match stream.read(&mut buf) {
        Ok(n) => n == 0,
        Err(e) => !matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ),
    };
    assert!(closed, "client should be hung up on when the upstream cannot be dialed");
    assert!(child.try_wait().unwrap().is_none(), "tunnel exited");

    let _ = child.kill();
    let _ = child.wait();
}

use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::session::ForwarderSession;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// First pause after a transient accept error.
const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(5);

/// Longest pause between accept retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Process-wide session counter, only used to correlate log lines.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Source of inbound connections for the accept loop.
#[async_trait]
pub trait Acceptor: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for the next inbound connection.
    async fn next_connection(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;
}

/// [`Acceptor`] over a bound tokio `TcpListener`.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    nodelay: bool,
}

impl TcpAcceptor {
    pub fn new(listener: TcpListener, nodelay: bool) -> Self {
        Self { listener, nodelay }
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Stream = TcpStream;

    async fn next_connection(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        if self.nodelay {
            stream.set_nodelay(true).ok();
        }
        Ok((stream, peer))
    }
}

/// Handle to a running accept loop.
#[derive(Debug)]
struct RunningListener {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

/// Owns the listening socket and hands every accepted connection to its own
/// [`ForwarderSession`].
///
/// Sessions are fire-and-forget: [`TunnelServer::stop`] closes the listener
/// but leaves sessions that are already relaying alone.
#[derive(Debug)]
pub struct TunnelServer {
    config: Arc<TunnelConfig>,
    running: Option<RunningListener>,
}

impl TunnelServer {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config: Arc::new(config),
            running: None,
        }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The bound address while running. Useful when listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Bind the listener and spawn the accept loop. Returns as soon as the
    /// socket is bound.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(TunnelError::AlreadyRunning);
        }

        let addr = self.config.listen;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TunnelError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TunnelError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let acceptor = TcpAcceptor::new(listener, self.config.nodelay);
        let task = tokio::spawn(accept_loop(acceptor, self.config.clone(), shutdown_rx));

        info!(
            "Tunnel listening on {} -> {}",
            local_addr, self.config.upstream
        );

        self.running = Some(RunningListener {
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Close the listener. Waits for the accept loop to drop the socket, so
    /// the port can be bound again as soon as this returns. Calling it on a
    /// server that is not running does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            debug!("Stop requested but tunnel is not running");
            return Ok(());
        };

        // The loop may already have exited on a fatal accept error.
        let _ = running.shutdown_tx.send(());

        match running.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Accept loop had already stopped: {}", e),
            Err(e) => return Err(TunnelError::Close(e.to_string())),
        }

        info!("Tunnel on {} stopped", running.local_addr);
        Ok(())
    }
}

/// Accept connections until told to stop or until a non-transient error.
pub(crate) async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    config: Arc<TunnelConfig>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let mut backoff: Option<Duration> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                debug!("Accept loop shutting down");
                return Ok(());
            }
            result = acceptor.next_connection() => {
                match result {
                    Ok((stream, peer)) => {
                        backoff = None;
                        spawn_session(stream, peer, &config);
                    }
                    Err(e) => match classify_accept_error(e) {
                        TunnelError::AcceptTransient(e) => {
                            let delay = next_backoff(backoff);
                            backoff = Some(delay);
                            warn!("Accept error: {}; retrying in {:?}", e, delay);
                            tokio::select! {
                                biased;
                                _ = &mut shutdown_rx => {
                                    debug!("Accept loop shutting down");
                                    return Ok(());
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        fatal => {
                            error!("Accept loop terminated: {}", fatal);
                            return Err(fatal);
                        }
                    },
                }
            }
        }
    }
}

fn spawn_session<S>(stream: S, peer: SocketAddr, config: &TunnelConfig)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    debug!(session = id, %peer, "New connection");
    let session = ForwarderSession::new(id, config);

    tokio::spawn(async move {
        match session.run(stream).await {
            Ok(summary) => debug!(
                session = summary.id,
                %peer,
                bytes_to_upstream = summary.bytes_to_upstream,
                bytes_to_inbound = summary.bytes_to_inbound,
                "Session closed"
            ),
            Err(e) => warn!(session = id, %peer, "{}", e),
        }
    });
}

fn next_backoff(current: Option<Duration>) -> Duration {
    match current {
        None => ACCEPT_BACKOFF_INITIAL,
        Some(d) => d.saturating_mul(2).min(ACCEPT_BACKOFF_MAX),
    }
}

/// Sort an accept failure into transient (retry) or fatal (stop the loop).
pub(crate) fn classify_accept_error(e: io::Error) -> TunnelError {
    if is_transient(&e) {
        TunnelError::AcceptTransient(e)
    } else {
        TunnelError::AcceptFatal(e)
    }
}

fn is_transient(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => true,
        _ => is_resource_exhaustion(e),
    }
}

/// Out of descriptors or buffer space: the listener itself is still fine.
#[cfg(unix)]
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_e: &io::Error) -> bool {
    false
}

//! A single tunnelled connection.
//!
//! A session dials the upstream, then runs two relay tasks:
//! - Task A copies inbound -> upstream
//! - Task B copies upstream -> inbound
//!
//! Each task reports on a shared completion channel of capacity 1 when it
//! ends, for any reason. The session waits for the first report only, then
//! cancels both tasks. Cancelling drops every half of both connections, so
//! both sockets are closed together and exactly once.

use crate::config::{TunnelConfig, UpstreamAddress};
use crate::error::{Result, TunnelError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, Instrument};

/// Size of the per-direction copy buffer.
const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Which way bytes flow through a relay task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    InboundToUpstream,
    UpstreamToInbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::InboundToUpstream => write!(f, "inbound->upstream"),
            Direction::UpstreamToInbound => write!(f, "upstream->inbound"),
        }
    }
}

/// Lifecycle of a session. `Closed` is terminal and reached exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Relaying,
    Closing,
    Closed,
}

/// What a finished session reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: u64,
    /// The direction whose termination triggered teardown. `None` only if
    /// both relay tasks vanished without reporting.
    pub first_finished: Option<Direction>,
    pub bytes_to_upstream: u64,
    pub bytes_to_inbound: u64,
}

/// Fires the completion channel when dropped, so a relay task reports even
/// when it is cancelled or panics.
struct CompletionSignal {
    direction: Direction,
    tx: mpsc::Sender<Direction>,
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        // Full means the other direction already reported first.
        let _ = self.tx.try_send(self.direction);
    }
}

/// Owns one accepted connection and its upstream counterpart.
pub struct ForwarderSession {
    id: u64,
    upstream: UpstreamAddress,
    dial_timeout: Option<Duration>,
    nodelay: bool,
    state: SessionState,
}

impl ForwarderSession {
    pub fn new(id: u64, config: &TunnelConfig) -> Self {
        Self {
            id,
            upstream: config.upstream.clone(),
            dial_timeout: config.dial_timeout,
            nodelay: config.nodelay,
            state: SessionState::Dialing,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        trace!(from = ?self.state, to = ?next, "session state change");
        self.state = next;
    }

    /// Dial the upstream and relay until either side finishes.
    ///
    /// On a dial failure the inbound connection is closed and the dial error
    /// is returned. Otherwise the session always ends `Ok`: relay errors only
    /// decide when teardown happens.
    #[instrument(name = "session", skip_all, fields(id = self.id, upstream = %self.upstream))]
    pub async fn run<S>(mut self, inbound: S) -> Result<SessionSummary>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let outbound = match self.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                self.transition(SessionState::Closing);
                drop(inbound);
                self.transition(SessionState::Closed);
                return Err(e);
            }
        };
        self.transition(SessionState::Relaying);

        let (inbound_read, inbound_write) = tokio::io::split(inbound);
        let (outbound_read, outbound_write) = outbound.into_split();

        let to_upstream = Arc::new(AtomicU64::new(0));
        let to_inbound = Arc::new(AtomicU64::new(0));
        let (done_tx, mut done_rx) = mpsc::channel(1);

        let task_a = tokio::spawn(
            relay(
                inbound_read,
                outbound_write,
                to_upstream.clone(),
                CompletionSignal {
                    direction: Direction::InboundToUpstream,
                    tx: done_tx.clone(),
                },
            )
            .in_current_span(),
        );
        let task_b = tokio::spawn(
            relay(
                outbound_read,
                inbound_write,
                to_inbound.clone(),
                CompletionSignal {
                    direction: Direction::UpstreamToInbound,
                    tx: done_tx,
                },
            )
            .in_current_span(),
        );

        let first_finished = done_rx.recv().await;
        self.transition(SessionState::Closing);
        debug!(first = ?first_finished, "relay finished, closing both connections");

        // Aborting an already finished task is a no-op, so this is safe in
        // either order. The join only observes the cancellation; it never
        // waits on the remaining task's I/O.
        task_a.abort();
        task_b.abort();
        let _ = task_a.await;
        let _ = task_b.await;
        self.transition(SessionState::Closed);

        Ok(SessionSummary {
            id: self.id,
            first_finished,
            bytes_to_upstream: to_upstream.load(Ordering::Relaxed),
            bytes_to_inbound: to_inbound.load(Ordering::Relaxed),
        })
    }

    async fn dial(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect(self.upstream.as_str());
        let result = match self.dial_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                TunnelError::DialTimeout {
                    addr: self.upstream.clone(),
                    timeout,
                }
            })?,
            None => connect.await,
        };
        let stream = result.map_err(|source| TunnelError::Dial {
            addr: self.upstream.clone(),
            source,
        })?;

        if self.nodelay {
            stream.set_nodelay(true).ok();
        }
        debug!("dialed upstream");
        Ok(stream)
    }
}

/// Copy `reader` into `writer` until EOF or an I/O error.
async fn relay<R, W>(
    reader: R,
    writer: W,
    counter: Arc<AtomicU64>,
    signal: CompletionSignal,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let direction = signal.direction;
    let result = copy_counted(reader, writer, direction, &counter).await;
    match &result {
        Ok(total) => trace!(%direction, bytes = total, "relay reached EOF"),
        Err(e) => debug!(%direction, error = %e, "relay stopped"),
    }
    drop(signal);
    result
}

async fn copy_counted<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    counter: &AtomicU64,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(source) => return Err(TunnelError::Relay { direction, source }),
        };

        writer
            .write_all(&buf[..n])
            .await
            .map_err(|source| TunnelError::Relay { direction, source })?;

        total = total.saturating_add(n as u64);
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

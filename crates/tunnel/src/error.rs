use crate::config::UpstreamAddress;
use crate::session::Direction;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running the tunnel.
///
/// Only `Bind`, `Close` and `AlreadyRunning` ever reach the caller of
/// `TunnelServer`; the rest are contained by the accept loop or by the
/// session that produced them and only show up in logs.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Transient accept error: {0}")]
    AcceptTransient(#[source] std::io::Error),

    #[error("Accept failed: {0}")]
    AcceptFatal(#[source] std::io::Error),

    #[error("Failed to dial upstream {addr}: {source}")]
    Dial {
        addr: UpstreamAddress,
        source: std::io::Error,
    },

    #[error("Timed out dialing upstream {addr} after {timeout:?}")]
    DialTimeout {
        addr: UpstreamAddress,
        timeout: Duration,
    },

    #[error("Relay {direction} failed: {source}")]
    Relay {
        direction: Direction,
        source: std::io::Error,
    },

    #[error("Failed to close listener: {0}")]
    Close(String),

    #[error("Tunnel server is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, TunnelError>;

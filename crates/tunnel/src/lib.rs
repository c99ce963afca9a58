//! Transparent TCP tunnelling for ssh-tunnel.
//!
//! This crate provides:
//! - `TunnelServer`: owns the listening socket and dispatches accepted connections
//! - `ForwarderSession`: dials the upstream and relays bytes both ways until either side closes
//! - `TunnelConfig` / `UpstreamTemplate`: the fixed upstream target and listener settings
//!
//! The server never tracks the sessions it spawns. Each session owns its two
//! connections and closes both of them exactly once, as soon as the first relay
//! direction finishes.

pub mod config;
pub mod error;
pub mod server;
pub mod session;


pub use config::{
    TunnelConfig, UpstreamAddress, UpstreamTemplate, DEFAULT_PORT, DEFAULT_UPSTREAM_SERVICE,
};
pub use error::{Result, TunnelError};
pub use server::{Acceptor, TcpAcceptor, TunnelServer};
pub use session::{Direction, ForwarderSession, SessionState, SessionSummary};

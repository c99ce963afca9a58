use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Port used for both the listener and the upstream when nothing else is configured.
pub const DEFAULT_PORT: u16 = 2200;

/// Service name used when rendering an [`UpstreamTemplate`].
pub const DEFAULT_UPSTREAM_SERVICE: &str = "ws-proxy";

/// A fully formed `host:port` target.
///
/// The string is opaque: no validation happens beyond what the dial itself
/// performs. Cloning is cheap, so every session gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamAddress(Arc<str>);

impl UpstreamAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(Arc::from(addr.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpstreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UpstreamAddress {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl From<String> for UpstreamAddress {
    fn from(addr: String) -> Self {
        Self::new(addr)
    }
}

impl From<SocketAddr> for UpstreamAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.to_string())
    }
}

/// Builds the upstream address from deployment values.
///
/// Renders as `<service>.<namespace>.<domain>:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTemplate {
    pub service: String,
    pub namespace: String,
    pub domain: String,
    pub port: u16,
}

impl UpstreamTemplate {
    pub fn new(namespace: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            service: DEFAULT_UPSTREAM_SERVICE.to_string(),
            namespace: namespace.into(),
            domain: domain.into(),
            port: DEFAULT_PORT,
        }
    }

    pub fn render(&self) -> UpstreamAddress {
        UpstreamAddress::new(format!(
            "{}.{}.{}:{}",
            self.service, self.namespace, self.domain, self.port
        ))
    }

    /// True when the namespace or the domain is blank. Such a template still
    /// renders, but the resulting host name is almost certainly wrong.
    pub fn is_incomplete(&self) -> bool {
        self.namespace.trim().is_empty() || self.domain.trim().is_empty()
    }
}

/// Everything the tunnel needs, fixed at construction time.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// Where every accepted connection is forwarded.
    pub upstream: UpstreamAddress,
    /// Upper bound on a single upstream dial. `None` leaves it to the OS.
    pub dial_timeout: Option<Duration>,
    /// Disable Nagle on both sides of each session.
    pub nodelay: bool,
}

impl TunnelConfig {
    pub fn new(upstream: impl Into<UpstreamAddress>) -> Self {
        Self {
            listen: default_listen_addr(),
            upstream: upstream.into(),
            dial_timeout: None,
            nodelay: true,
        }
    }

    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// `0.0.0.0:2200`
pub fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use tunnel::{
    TunnelConfig, UpstreamAddress, UpstreamTemplate, DEFAULT_PORT, DEFAULT_UPSTREAM_SERVICE,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (if enabled)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for machine parsing
    Json,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum ColorMode {
    /// Auto-detect based on terminal capabilities
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Determine if colors should be enabled based on mode and terminal detection.
    pub fn should_enable(&self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-tunnel")]
#[command(
    author,
    version,
    about = "Accept TCP connections and forward them, byte for byte, to a fixed upstream"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(long = "listen", env = "SSH_TUNNEL_LISTEN", default_value = "0.0.0.0:2200")]
    pub listen: SocketAddr,

    /// Full upstream address (`host:port`). Overrides the namespace/domain template.
    #[arg(short = 'u', long = "upstream", env = "SSH_TUNNEL_UPSTREAM")]
    pub upstream: Option<String>,

    /// Namespace segment of the upstream host name
    #[arg(long = "namespace", env = "KUBE_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Domain segment of the upstream host name
    #[arg(long = "domain", env = "KUBE_DOMAIN", default_value = "")]
    pub domain: String,

    /// Service segment of the upstream host name
    #[arg(long = "upstream-service", default_value = DEFAULT_UPSTREAM_SERVICE)]
    pub upstream_service: String,

    /// Upstream port used with the namespace/domain template
    #[arg(long = "upstream-port", default_value_t = DEFAULT_PORT)]
    pub upstream_port: u16,

    /// Give up dialing the upstream after this many milliseconds (no limit by default)
    #[arg(long = "dial-timeout-ms")]
    pub dial_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Enable colored log output (auto-detected by default)
    #[arg(long = "color", default_value = "auto")]
    pub color: ColorMode,
}

impl Cli {
    /// The template built from namespace, domain, service and port.
    pub fn upstream_template(&self) -> UpstreamTemplate {
        UpstreamTemplate {
            service: self.upstream_service.clone(),
            namespace: self.namespace.clone(),
            domain: self.domain.clone(),
            port: self.upstream_port,
        }
    }

    /// True when the upstream comes from the template rather than `--upstream`.
    pub fn uses_template(&self) -> bool {
        self.upstream.is_none()
    }

    pub fn upstream_address(&self) -> UpstreamAddress {
        match &self.upstream {
            Some(addr) => UpstreamAddress::new(addr.clone()),
            None => self.upstream_template().render(),
        }
    }

    pub fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig::new(self.upstream_address())
            .with_listen(self.listen)
            .with_dial_timeout(self.dial_timeout_ms.map(Duration::from_millis))
    }
}

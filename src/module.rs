//! Host module surface.
//!
//! A host drives a module through three hooks: `provision` once with its
//! configuration, `start` exactly once before traffic is expected, and `stop`
//! at most once to cease operation. The tunnel itself knows nothing about
//! this; `SshTunnelModule` only adapts the hooks onto a [`TunnelServer`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use tunnel::{TunnelConfig, TunnelServer};

/// Identifier the tunnel module registers under.
pub const MODULE_ID: &str = "ssh-tunnel";

#[async_trait]
pub trait Module: Send {
    fn id(&self) -> &'static str;

    fn provision(&mut self, config: TunnelConfig) -> Result<()>;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct SshTunnelModule {
    server: Option<TunnelServer>,
}

impl SshTunnelModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self) -> Option<&TunnelServer> {
        self.server.as_ref()
    }
}

#[async_trait]
impl Module for SshTunnelModule {
    fn id(&self) -> &'static str {
        MODULE_ID
    }

    fn provision(&mut self, config: TunnelConfig) -> Result<()> {
        debug!(listen = %config.listen, upstream = %config.upstream, "Provisioning {}", MODULE_ID);
        self.server = Some(TunnelServer::new(config));
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let server = self.server.as_mut().ok_or(Error::NotProvisioned(MODULE_ID))?;
        server.start().await?;
        info!("ssh tunnel is running");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        match self.server.as_mut() {
            Some(server) => Ok(server.stop().await?),
            None => Ok(()),
        }
    }
}

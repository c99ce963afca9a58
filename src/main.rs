mod cli;
mod error;
mod logging;
mod module;

use clap::Parser;
use cli::Cli;
use module::{Module, SshTunnelModule};
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(&cli);

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

#[instrument(name = "run", skip(cli), fields(listen = %cli.listen))]
async fn run(cli: Cli) -> error::Result<()> {
    info!("ssh-tunnel v{}", env!("CARGO_PKG_VERSION"));

    if cli.uses_template() && cli.upstream_template().is_incomplete() {
        warn!(
            "Namespace or domain is empty (set KUBE_NAMESPACE/KUBE_DOMAIN or pass --upstream); forwarding to {}",
            cli.upstream_address()
        );
    }

    let mut module = SshTunnelModule::new();
    module.provision(cli.tunnel_config())?;
    module.start().await?;
    if let Some(addr) = module.server().and_then(|s| s.local_addr()) {
        info!(module = module.id(), %addr, "Serving");
    }

    wait_for_shutdown().await?;
    info!("Shutdown signal received");

    module.stop().await
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

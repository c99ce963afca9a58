use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Module {0} was started before it was provisioned")]
    NotProvisioned(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

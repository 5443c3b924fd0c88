//! MangaPulse error type.

use thiserror::Error;

/// All errors surfaced by MangaPulse crates.
#[derive(Debug, Error)]
pub enum MangaPulseError {
    /// Configuration load/parse failure.
    #[error("config error: {0}")]
    Config(String),

    /// Chapter source failure (network, bad response).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Watchlist registry failure.
    #[error("registry error: {0}")]
    Registry(String),

    /// Ledger or registry file write/read failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Push transport failure.
    #[error("notify error: {0}")]
    Notify(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MangaPulseError>;

//! Error handling (Error Handling System)
//!
//! A single domain error type plus the global `Result` alias. Transient
//! per-probe failures are never represented here — they are folded into
//! `bool`/`Option` results at the call site (see spec §7).

use thiserror::Error;

/// Global error definition.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("core subprocess error: {0}")]
    CoreProcess(String),

    #[error("no connectivity at pre-flight")]
    NoConnectivity,

    #[error("sources file not found: {0}")]
    MissingSources(String),

    #[error("other error: {0}")]
    Custom(String),
}

/// Global `Result` alias.
pub type Result<T> = std::result::Result<T, HarvestError>;

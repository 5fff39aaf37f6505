//! Error types for the rebalancing agent.

use std::path::PathBuf;

/// All errors that can occur during agent operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("price feed error: {0}")]
    Feed(String),

    #[error("balance query error: {0}")]
    Balance(String),

    #[error("swap error: {0}")]
    Swap(String),

    #[error("failed to read state file {path}: {source}")]
    StoreRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse state JSON: {0}")]
    StoreParse(#[from] serde_json::Error),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),

    #[error("aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, Error>;

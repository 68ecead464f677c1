//! Error types for the reconciliation engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OddsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Source store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store query timed out after {timeout_secs} seconds")]
    QueryTimeout { timeout_secs: u64 },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lookup table error: {0}")]
    Lookup(String),

    #[error("Unknown market type: {0}")]
    UnknownMarketType(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for OddsError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                OddsError::StoreUnavailable("timed out waiting for a connection".to_string())
            }
            sqlx::Error::PoolClosed => {
                OddsError::StoreUnavailable("connection pool is closed".to_string())
            }
            other => OddsError::Database(other),
        }
    }
}

impl From<toml::de::Error> for OddsError {
    fn from(err: toml::de::Error) -> Self {
        OddsError::Lookup(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OddsError>;

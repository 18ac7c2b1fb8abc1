//! Error types for the courtside storage and synchronization engine.

use thiserror::Error;

/// Storage-related errors
///
/// Every backend maps its native failures into this taxonomy so callers can
/// react uniformly regardless of which store is configured.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable (network down, file locked, service offline)
    #[error("connection error: {0}")]
    Connection(String),

    /// Missing or invalid backend parameters; raised at startup, not first use
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Schema bootstrap or verification failure
    #[error("schema error: {0}")]
    Schema(String),

    /// Malformed filter combination or backend-specific translation failure
    #[error("query error: {0}")]
    Query(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, ref msg)
                if e.code == rusqlite::ErrorCode::CannotOpen
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Connection(format!(
                    "sqlite: {}",
                    msg.clone().unwrap_or_else(|| e.to_string())
                ))
            }
            other => StoreError::Query(format!("sqlite: {}", other)),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            StoreError::Connection(format!("http: {}", err))
        } else {
            StoreError::Query(format!("http: {}", err))
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Query(format!("payload (de)serialization: {}", err))
    }
}

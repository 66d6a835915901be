//! Persistence layer for tetherd
//!
//! Provides:
//! - Audit log (append-only)
//! - Shared key-value table for flags read by other processes
//! - Escalation state snapshot for recovery
//! - Challenge records, connection log and contact candidates

mod audit;
mod shared;
mod sqlite;
mod traits;

pub use audit::*;
pub use shared::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for tether_util::TetherError {
    fn from(e: StoreError) -> Self {
        tether_util::TetherError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

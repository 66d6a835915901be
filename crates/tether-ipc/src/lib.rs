//! IPC layer for tetherd
//!
//! Provides:
//! - Unix domain socket server for the platform bridge and UI shells
//! - NDJSON (newline-delimited JSON) protocol
//! - Client connection management and event fan-out
//! - Peer UID authentication

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl From<IpcError> for tether_util::TetherError {
    fn from(e: IpcError) -> Self {
        tether_util::TetherError::ipc(e.to_string())
    }
}

pub type IpcResult<T> = Result<T, IpcError>;

//! Domain and protocol types for tether
//!
//! This crate defines the stable vocabulary shared by the engine, the store
//! and clients of the daemon:
//! - Challenges, verification outcomes and the connection log
//! - Shield domains and intervention levels
//! - Commands and responses (client -> daemon)
//! - Events (daemon -> clients)

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;

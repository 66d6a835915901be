//! Shared utilities for tether
//!
//! This crate provides:
//! - ID types (ChallengeId, ContactId, AppToken, ClientId)
//! - Wall-clock helpers (mock time, night window, day boundaries)
//! - Error types
//! - Per-calendar-day quota counters
//! - Default paths for socket, data, and config files

mod error;
mod ids;
mod paths;
mod quota;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use quota::*;
pub use time::*;

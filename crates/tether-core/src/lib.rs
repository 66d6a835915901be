//! Escalation and verification engine for tetherd
//!
//! This crate is the heart of tetherd, containing:
//! - Usage observation against a night-scaled threshold ladder
//! - The escalation controller deciding which intervention level is due
//! - Verification strategies (call, messaging duration, photo, auto-verify)
//! - The shield coordinator with its emergency-unlock sub-machine
//! - Contact selection for prosocial challenges

mod contacts;
mod engine;
mod escalation;
mod events;
mod monitor;
mod shield;
pub mod verify;

pub use contacts::*;
pub use engine::*;
pub use escalation::*;
pub use events::*;
pub use monitor::*;
pub use shield::*;

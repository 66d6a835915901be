//! Platform collaborator interfaces for tether
//!
//! This crate defines the boundary between the engine and the platform:
//! app-blocking shields, deep links into the phone or messaging surface,
//! notifications and remote scene classification. It contains no platform
//! code itself; mock implementations are provided for tests.

mod classifier;
mod mock;
mod traits;

pub use classifier::*;
pub use mock::*;
pub use traits::*;

//! Verification strategies
//!
//! Each strategy turns a raw, unreliable external signal into exactly one
//! terminal [`VerificationOutcome`] per challenge. Watch-based strategies
//! (call, messaging) are driven by signals and the engine tick; photo
//! classification runs as its own bounded future.

mod auto;
mod call;
mod messaging;
mod photo;

pub use auto::*;
pub use call::*;
pub use messaging::*;
pub use photo::*;

use chrono::{DateTime, Local};
use tether_api::{Challenge, ConnectionLogEntry, VerificationMethod, VerificationOutcome};
use tether_util::{ChallengeId, ContactId};

/// Outcome delivered by a strategy for one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    pub challenge_id: ChallengeId,
    pub outcome: VerificationOutcome,
    pub method: VerificationMethod,
    /// Connection to append to the log, if the signal was a real connection
    pub connection: Option<ConnectionLogEntry>,
}

/// Contact details carried by a watch for connection logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchContact {
    pub identifier: Option<ContactId>,
    pub name: Option<String>,
}

impl WatchContact {
    pub fn of(challenge: &Challenge) -> Self {
        Self {
            identifier: challenge.contact_identifier.clone(),
            name: challenge.contact_name.clone(),
        }
    }
}

/// A strategy that observes signals for one pending challenge at a time
pub trait WatchStrategy {
    /// Begin observing for `challenge`, superseding any earlier watch
    fn start(&mut self, challenge: &Challenge, now: DateTime<Local>);

    /// Drop any watch for `challenge_id`
    fn cancel(&mut self, challenge_id: &ChallengeId);

    /// Deliver timeouts that have come due
    fn tick(&mut self, now: DateTime<Local>) -> Option<StrategyOutcome>;

    fn is_watching(&self, challenge_id: &ChallengeId) -> bool;
}

//! Event types for tetherd -> client streaming

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tether_util::{AppToken, ChallengeId};

use crate::{
    Challenge, ChallengeKind, EngineStateSnapshot, Intervention, ShieldDomainKind,
    VerificationOutcome, API_VERSION,
};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: tether_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full state snapshot (sent on subscribe and major changes)
    StateChanged(EngineStateSnapshot),

    /// A usage threshold was crossed
    LevelReached {
        level: u8,
        intervention: Intervention,
        /// Whether the prosocial branch applies for this level
        prosocial: bool,
    },

    /// A new challenge is waiting for the user
    ChallengeIssued(Challenge),

    /// A challenge reached a terminal outcome (or a failed attempt was recorded)
    ChallengeResolved {
        challenge_id: ChallengeId,
        outcome: VerificationOutcome,
    },

    /// A challenge was skipped by the user
    ChallengeSkipped { challenge_id: ChallengeId },

    /// A shield domain was applied or cleared
    ShieldChanged {
        domain: ShieldDomainKind,
        active: bool,
    },

    /// An emergency unlock was granted
    EmergencyUnlockGranted {
        expires_at: DateTime<Local>,
        unlocks_remaining: u32,
    },

    /// The emergency unlock window ended and the budget shield is back
    EmergencyUnlockExpired,

    /// Daily counters were reset
    DayRolledOver { day: NaiveDate },

    /// A reminder notification was delivered
    ReminderSent {
        message: String,
        remaining_today: u32,
    },

    /// Platform bridge: replace the named shield store's contents
    /// (an empty list clears it)
    ShieldStoreChanged {
        domain: ShieldDomainKind,
        apps: Vec<AppToken>,
    },

    /// Platform bridge: open the telephone or messaging surface
    DeepLinkRequested {
        kind: ChallengeKind,
        phone: Option<String>,
    },

    /// Platform bridge: post a user-visible notification
    NotificationRequested { message: String },

    /// Service is shutting down
    Shutdown,
}

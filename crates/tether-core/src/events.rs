//! Core events emitted by the engine

use chrono::{DateTime, Local, NaiveDate};
use tether_api::{
    Challenge, Intervention, ShieldDomainKind, VerificationMethod, VerificationOutcome,
};
use tether_util::ChallengeId;

/// Events emitted by the core engine
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A usage threshold fired
    LevelReached {
        level: u8,
        intervention: Intervention,
        prosocial: bool,
    },

    /// A challenge was issued
    ChallengeIssued(Challenge),

    /// A verification strategy delivered an outcome
    ChallengeResolved {
        challenge_id: ChallengeId,
        outcome: VerificationOutcome,
        method: VerificationMethod,
    },

    ChallengeSkipped {
        challenge_id: ChallengeId,
    },

    /// A shield domain changed state
    ShieldChanged {
        domain: ShieldDomainKind,
        active: bool,
    },

    EmergencyUnlockGranted {
        expires_at: DateTime<Local>,
        unlocks_remaining: u32,
    },

    /// Budget shield re-applied after an emergency unlock ran out
    EmergencyUnlockExpired,

    /// Daily counters were reset
    DayRolledOver {
        day: NaiveDate,
    },

    ReminderSent {
        message: String,
        remaining_today: u32,
    },
}

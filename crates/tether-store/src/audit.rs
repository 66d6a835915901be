//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tether_api::{ShieldDomainKind, VerificationMethod};
use tether_util::ChallengeId;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Usage crossed a threshold
    LevelReached { level: u8, minutes_used: u32 },

    ChallengeIssued {
        challenge_id: ChallengeId,
        level: u8,
        kind: String,
    },

    /// A challenge reached a verification outcome
    ChallengeResolved {
        challenge_id: ChallengeId,
        outcome: String,
        method: Option<VerificationMethod>,
        xp: u32,
    },

    ChallengeSkipped { challenge_id: ChallengeId },

    ShieldApplied {
        domain: ShieldDomainKind,
        app_count: usize,
    },

    ShieldCleared { domain: ShieldDomainKind },

    EmergencyUnlockGranted {
        expires_at: DateTime<Local>,
        used: u32,
        max: u32,
    },

    EmergencyUnlockDenied { used: u32, max: u32 },

    EmergencyUnlockExpired,

    /// Daily counters reset
    DayReset { day: NaiveDate },

    ReminderSent { remaining: u32 },

    ReminderSuppressed,

    /// Client connected
    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: tether_util::now(),
            event,
        }
    }
}

//! Store trait definitions

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tether_api::{Challenge, ConnectionLogEntry, Contact};
use tether_util::ChallengeId;

use crate::{AuditEvent, StoreResult};

/// Main store trait. CRUD only; no business logic lives behind it.
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Shared key-value (cross-process, last writer wins)

    fn get_shared(&self, key: &str) -> StoreResult<Option<String>>;

    fn set_shared(&self, key: &str, value: &str) -> StoreResult<()>;

    fn remove_shared(&self, key: &str) -> StoreResult<()>;

    // Escalation state

    fn load_escalation(&self) -> StoreResult<Option<EscalationSnapshot>>;

    fn save_escalation(&self, snapshot: &EscalationSnapshot) -> StoreResult<()>;

    // Challenges

    /// Insert or replace a challenge record
    fn save_challenge(&self, challenge: &Challenge) -> StoreResult<()>;

    fn get_challenge(&self, id: &ChallengeId) -> StoreResult<Option<Challenge>>;

    /// Challenges that are neither verified nor skipped, oldest first
    fn open_challenges(&self) -> StoreResult<Vec<Challenge>>;

    // Connection log (append-only)

    fn append_connection(&self, entry: &ConnectionLogEntry) -> StoreResult<()>;

    /// Entries at or after `since`, oldest first
    fn connections_since(&self, since: DateTime<Local>) -> StoreResult<Vec<ConnectionLogEntry>>;

    // Contacts

    fn list_contacts(&self) -> StoreResult<Vec<Contact>>;

    fn upsert_contact(&self, contact: &Contact) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Persisted escalation state for recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSnapshot {
    /// Calendar day the state belongs to
    pub day: NaiveDate,

    /// Threshold indices already fired on `day`
    pub fired_levels: Vec<u8>,

    pub current_level: u8,

    /// Last usage report on `day`
    pub minutes_used: u32,

    /// Hard friction stays until the next daily reset
    pub hard_friction: bool,
}

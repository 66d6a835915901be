//! Shared types for the tether API

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tether_util::{AppToken, ChallengeId, ContactId};

/// Scene a grounding photo is expected to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SceneCategory {
    Outside,
    HoldingWater,
    Standing,
}

impl SceneCategory {
    pub const ALL: [SceneCategory; 3] = [
        SceneCategory::Outside,
        SceneCategory::HoldingWater,
        SceneCategory::Standing,
    ];

    /// Phrase used when asking the classifier about this scene
    pub fn description(&self) -> &'static str {
        match self {
            SceneCategory::Outside => "a person outside, outdoors",
            SceneCategory::HoldingWater => "a person holding a glass or bottle of water",
            SceneCategory::Standing => "a person standing up",
        }
    }
}

impl fmt::Display for SceneCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SceneCategory::Outside => "outside",
            SceneCategory::HoldingWater => "holding-water",
            SceneCategory::Standing => "standing",
        };
        f.write_str(s)
    }
}

/// What the user is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Message a contact
    Text,
    /// Call a contact
    Call,
    /// Take a photo proving a grounding action
    Grounding { scene: SceneCategory },
}

impl ChallengeKind {
    pub fn is_prosocial(&self) -> bool {
        matches!(self, ChallengeKind::Text | ChallengeKind::Call)
    }
}

/// How a challenge was verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    CallObserver,
    CommunicationCategory,
    PhotoAi,
    AutoVerified,
}

/// A friction challenge issued when an intervention level fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub kind: ChallengeKind,
    pub contact_identifier: Option<ContactId>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub target_app: Option<AppToken>,
    pub level: u8,
    pub was_verified: bool,
    pub verification_method: Option<VerificationMethod>,
    pub xp_earned: u32,
    pub was_skipped: bool,
    pub issued_at: DateTime<Local>,
    /// When verification was last begun; watches resume from here after a restart
    #[serde(default)]
    pub started_at: Option<DateTime<Local>>,
    pub verified_at: Option<DateTime<Local>>,
}

impl Challenge {
    pub fn new(kind: ChallengeKind, level: u8, issued_at: DateTime<Local>) -> Self {
        Self {
            id: ChallengeId::new(),
            kind,
            contact_identifier: None,
            contact_name: None,
            contact_phone: None,
            target_app: None,
            level,
            was_verified: false,
            verification_method: None,
            xp_earned: 0,
            was_skipped: false,
            issued_at,
            started_at: None,
            verified_at: None,
        }
    }

    pub fn with_contact(mut self, contact: &Contact) -> Self {
        self.contact_identifier = Some(contact.identifier.clone());
        self.contact_name = Some(contact.name.clone());
        self.contact_phone = contact.phone.clone();
        self
    }

    pub fn with_target_app(mut self, app: Option<AppToken>) -> Self {
        self.target_app = app;
        self
    }

    /// Terminal challenges are immutable; later events for them are stale
    pub fn is_terminal(&self) -> bool {
        self.verified_at.is_some() || self.was_skipped
    }
}

/// Terminal result of a verification strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified { xp: u32, message: String },
    PartiallyVerified { xp: u32, message: String },
    Failed { message: String },
}

impl VerificationOutcome {
    pub fn verified(xp: u32, message: impl Into<String>) -> Self {
        Self::Verified {
            xp,
            message: message.into(),
        }
    }

    pub fn partial(xp: u32, message: impl Into<String>) -> Self {
        Self::PartiallyVerified {
            xp,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// XP awarded (zero for failures)
    pub fn xp(&self) -> u32 {
        match self {
            Self::Verified { xp, .. } | Self::PartiallyVerified { xp, .. } => *xp,
            Self::Failed { .. } => 0,
        }
    }

    /// Whether the outcome resolves the challenge
    pub fn counts(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Verified { message, .. }
            | Self::PartiallyVerified { message, .. }
            | Self::Failed { message } => message,
        }
    }
}

/// Kind of real-world connection recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Call,
    CallAttempted,
    Text,
}

impl ConnectionType {
    /// Attempts do not count towards auto-verification
    pub fn is_genuine(&self) -> bool {
        !matches!(self, ConnectionType::CallAttempted)
    }
}

/// Append-only record of a real-world connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLogEntry {
    pub contact_identifier: Option<ContactId>,
    pub contact_name: Option<String>,
    pub timestamp: DateTime<Local>,
    pub duration_seconds: u64,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
}

/// Contact candidate for prosocial challenges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub identifier: ContactId,
    pub name: String,
    pub phone: Option<String>,
}

impl Contact {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: ContactId::new(identifier),
            name: name.into(),
            phone: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}

/// Independent app-blocking policy domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldDomainKind {
    FocusSession,
    DailyBudget,
    WifiGate,
    Friction,
}

impl ShieldDomainKind {
    pub const ALL: [ShieldDomainKind; 4] = [
        ShieldDomainKind::FocusSession,
        ShieldDomainKind::DailyBudget,
        ShieldDomainKind::WifiGate,
        ShieldDomainKind::Friction,
    ];

    /// Stable name used for platform stores and shared keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ShieldDomainKind::FocusSession => "focus_session",
            ShieldDomainKind::DailyBudget => "daily_budget",
            ShieldDomainKind::WifiGate => "wifi_gate",
            ShieldDomainKind::Friction => "friction",
        }
    }

    /// Attribution rank when several domains block the same app (higher wins)
    pub fn precedence(&self) -> u8 {
        match self {
            ShieldDomainKind::DailyBudget => 3,
            ShieldDomainKind::WifiGate => 2,
            ShieldDomainKind::Friction => 1,
            ShieldDomainKind::FocusSession => 0,
        }
    }
}

impl fmt::Display for ShieldDomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intervention chosen for a friction level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intervention {
    /// Gentle reminder notification
    Nudge,
    /// Prosocial: message a contact
    TextChallenge,
    /// Non-prosocial fallback for level 2
    BreathingExercise,
    /// Photo proof of a grounding action
    GroundingChallenge { scene: SceneCategory },
    /// Prosocial: call a contact
    CallChallenge,
    /// Non-prosocial fallback for level 4
    MoodCheckIn,
    /// Friction shield until the next day
    HardFriction,
}

impl Intervention {
    /// Challenge kind issued for this intervention, if any
    pub fn challenge_kind(&self) -> Option<ChallengeKind> {
        match self {
            Intervention::TextChallenge => Some(ChallengeKind::Text),
            Intervention::CallChallenge => Some(ChallengeKind::Call),
            Intervention::GroundingChallenge { scene } => {
                Some(ChallengeKind::Grounding { scene: *scene })
            }
            _ => None,
        }
    }

    pub fn is_prosocial(&self) -> bool {
        matches!(self, Intervention::TextChallenge | Intervention::CallChallenge)
    }
}

/// Telephony lifecycle signal reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelephonySignal {
    Dialing { at: DateTime<Local> },
    Connected { at: DateTime<Local> },
    Disconnected { at: DateTime<Local> },
}

impl TelephonySignal {
    pub fn at(&self) -> DateTime<Local> {
        match self {
            TelephonySignal::Dialing { at }
            | TelephonySignal::Connected { at }
            | TelephonySignal::Disconnected { at } => *at,
        }
    }
}

/// Polled status of a messaging-duration watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingStatus {
    /// Window still open, threshold not yet reached
    Watching,
    /// Threshold reached, challenge verified
    Verified,
    /// Window closed without confirmation; not a failure
    Unconfirmed,
    /// No watch exists for this challenge
    NotWatching,
}

/// Status of a single shield domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatus {
    pub kind: ShieldDomainKind,
    pub enabled: bool,
    pub active: bool,
    pub apps: Vec<AppToken>,
}

/// Status of the daily-budget emergency unlock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyUnlockStatus {
    pub active: bool,
    pub expires_at: Option<DateTime<Local>>,
    pub unlocks_used_today: u32,
    pub max_unlocks_per_day: u32,
}

/// Full engine state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStateSnapshot {
    pub api_version: u32,
    pub day: NaiveDate,
    pub minutes_used_today: u32,
    pub current_level: u8,
    pub fired_levels: Vec<u8>,
    pub night_mode_active: bool,
    pub open_challenges: Vec<Challenge>,
    pub domains: Vec<DomainStatus>,
    pub emergency_unlock: EmergencyUnlockStatus,
    pub reminders_remaining: u32,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// UI shell - user actions (begin/skip challenges, unlock, focus)
    Shell,
    /// Platform bridge or local admin - may also reset the day
    Admin,
}

impl ClientRole {
    pub fn can_reset_day(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub shield_backend_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_kind_serialization() {
        let kind = ChallengeKind::Grounding {
            scene: SceneCategory::HoldingWater,
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("grounding"));
        assert!(json.contains("holding-water"));

        let parsed: ChallengeKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, parsed);
    }

    #[test]
    fn connection_entry_uses_type_field() {
        let entry = ConnectionLogEntry {
            contact_identifier: Some(ContactId::new("c1")),
            contact_name: None,
            timestamp: Local::now(),
            duration_seconds: 42,
            connection_type: ConnectionType::CallAttempted,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"call_attempted\""));
    }

    #[test]
    fn attempted_calls_are_not_genuine() {
        assert!(ConnectionType::Call.is_genuine());
        assert!(ConnectionType::Text.is_genuine());
        assert!(!ConnectionType::CallAttempted.is_genuine());
    }

    #[test]
    fn terminal_challenge() {
        let mut challenge = Challenge::new(ChallengeKind::Call, 4, Local::now());
        assert!(!challenge.is_terminal());
        challenge.was_skipped = true;
        assert!(challenge.is_terminal());
    }

    #[test]
    fn outcome_xp() {
        assert_eq!(VerificationOutcome::verified(25, "ok").xp(), 25);
        assert_eq!(VerificationOutcome::partial(5, "rang").xp(), 5);
        assert_eq!(VerificationOutcome::failed("no").xp(), 0);
        assert!(!VerificationOutcome::failed("no").counts());
    }

    #[test]
    fn domain_precedence_prefers_budget() {
        let mut kinds = ShieldDomainKind::ALL.to_vec();
        kinds.sort_by_key(|k| std::cmp::Reverse(k.precedence()));
        assert_eq!(kinds[0], ShieldDomainKind::DailyBudget);
        assert_eq!(kinds[3], ShieldDomainKind::FocusSession);
    }
}

//! Command types for the tetherd protocol

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tether_util::{ChallengeId, ClientId};

use crate::{ClientRole, Contact, MessagingStatus, TelephonySignal, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    ChallengeNotFound,
    ChallengeResolved,
    QuotaExhausted,
    DomainDisabled,
    PermissionDenied,
    ConfigError,
    HostError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Get current engine state
    GetState,

    /// Report cumulative usage minutes for today
    ReportUsage { minutes: u32 },

    /// Telephony lifecycle signal
    Telephony { signal: TelephonySignal },

    /// Cumulative foreground seconds in the messaging category
    MessagingForeground {
        challenge_id: Option<ChallengeId>,
        seconds: u64,
    },

    /// User accepted a challenge: open the deep link and start observing
    BeginChallenge { id: ChallengeId },

    /// User skipped a challenge
    SkipChallenge { id: ChallengeId },

    /// Photo evidence for a grounding challenge
    SubmitPhoto { id: ChallengeId, image_base64: String },

    /// Poll the messaging confirmation for a challenge
    PollMessaging { id: ChallengeId },

    /// Temporarily lift the daily-budget shield
    EmergencyUnlock,

    /// Start a voluntary focus session
    StartFocusSession { minutes: u32 },

    /// End the focus session early
    EndFocusSession,

    /// Current network identifier changed (None = offline/unknown)
    NetworkChanged { network: Option<String> },

    /// Ask for a reminder notification (quota-limited)
    RequestReminder { message: String },

    /// Force a daily reset (admin only)
    ResetDay,

    /// Add or update a contact candidate
    AddContact { contact: Contact },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    State(crate::EngineStateSnapshot),
    UsageRecorded {
        level: Option<u8>,
    },
    Accepted,
    ChallengeStarted {
        challenge: crate::Challenge,
    },
    ChallengeSkipped,
    PhotoQueued,
    Messaging {
        status: MessagingStatus,
    },
    Unlocked {
        expires_at: DateTime<Local>,
        unlocks_remaining: u32,
    },
    FocusStarted {
        ends_at: DateTime<Local>,
    },
    FocusEnded,
    Reminder {
        sent: bool,
        remaining_today: u32,
    },
    DayReset,
    ContactSaved,
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(crate::HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(1, Command::ReportUsage { minutes: 17 });
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert!(matches!(parsed.command, Command::ReportUsage { minutes: 17 }));
    }

    #[test]
    fn telephony_command_from_bridge_json() {
        let json = r#"{"request_id":3,"api_version":1,"command":{"type":"telephony","signal":{"type":"connected","at":"2026-03-01T10:00:00+00:00"}}}"#;
        let parsed: Request = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed.command,
            Command::Telephony {
                signal: TelephonySignal::Connected { .. }
            }
        ));
    }

    #[test]
    fn response_serialization() {
        let resp = Response::error(7, ErrorInfo::new(ErrorCode::QuotaExhausted, "no unlocks left"));

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("quota_exhausted"));
        let parsed: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 7);
        assert!(matches!(parsed.result, ResponseResult::Err(_)));
    }
}

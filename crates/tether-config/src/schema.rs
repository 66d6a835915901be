//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Usage thresholds and night mode
    #[serde(default)]
    pub escalation: RawEscalationConfig,

    /// Verification strategy tuning
    #[serde(default)]
    pub verification: RawVerificationConfig,

    /// Remote scene classification service
    #[serde(default)]
    pub classifier: RawClassifierConfig,

    /// XP tiers
    #[serde(default)]
    pub rewards: RawRewards,

    /// Shield domains
    #[serde(default)]
    pub shields: RawShields,

    /// Reminder notifications
    #[serde(default)]
    pub notifications: RawNotifications,

    /// Contact candidates seeded into the store at startup
    #[serde(default)]
    pub contacts: Vec<RawContact>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for store
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEscalationConfig {
    /// Minute thresholds, strictly increasing
    pub thresholds_minutes: Option<Vec<u32>>,

    /// Night mode start hour (inclusive)
    pub night_start_hour: Option<u8>,

    /// Night mode end hour (exclusive)
    pub night_end_hour: Option<u8>,

    pub prosocial_enabled: Option<bool>,

    /// Apps targeted by friction interventions
    #[serde(default)]
    pub monitored_apps: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawVerificationConfig {
    pub call_min_seconds: Option<u64>,
    pub long_call_seconds: Option<u64>,
    pub call_watch_seconds: Option<u64>,
    pub call_max_seconds: Option<u64>,
    pub messaging_threshold_seconds: Option<u64>,
    pub messaging_window_seconds: Option<u64>,
    pub auto_verify_connections: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawClassifierConfig {
    /// Endpoint URL; classification falls back to lenient acceptance when unset
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer credential
    pub api_key_env: Option<String>,

    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRewards {
    pub text_sent: Option<u32>,
    pub call_attempted: Option<u32>,
    pub call_completed: Option<u32>,
    pub long_call_5min: Option<u32>,
    pub photo_verified: Option<u32>,
    pub auto_verified: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawShields {
    #[serde(default)]
    pub focus_session: RawDomain,

    #[serde(default)]
    pub daily_budget: RawBudgetDomain,

    #[serde(default)]
    pub wifi_gate: RawWifiGateDomain,

    #[serde(default)]
    pub friction: RawDomain,
}

/// Common per-domain settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDomain {
    /// Domains are enabled unless explicitly turned off
    pub enabled: Option<bool>,

    #[serde(default)]
    pub apps: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBudgetDomain {
    /// Off unless explicitly enabled
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub apps: Vec<String>,

    /// Usage minutes after which the budget shield locks
    pub budget_minutes: Option<u32>,

    pub max_unlocks_per_day: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawWifiGateDomain {
    /// Off unless explicitly enabled
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub apps: Vec<String>,

    /// Networks on which the gated apps are allowed
    #[serde(default)]
    pub allowed_networks: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNotifications {
    pub max_reminders_per_day: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawContact {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
}

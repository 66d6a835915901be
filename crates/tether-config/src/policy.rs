//! Validated policy structures

use crate::schema::{
    RawBudgetDomain, RawClassifierConfig, RawConfig, RawContact, RawDomain, RawEscalationConfig,
    RawRewards, RawServiceConfig, RawVerificationConfig, RawWifiGateDomain,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tether_api::{Contact, ShieldDomainKind};
use tether_util::{default_data_dir, default_socket_path, AppToken, ContactId, NightWindow};

pub const DEFAULT_THRESHOLDS_MINUTES: [u32; 5] = [5, 15, 30, 45, 60];
pub const DEFAULT_NIGHT_START_HOUR: u8 = 22;
pub const DEFAULT_NIGHT_END_HOUR: u8 = 6;
pub const DEFAULT_CALL_MIN_SECONDS: u64 = 10;
pub const DEFAULT_LONG_CALL_SECONDS: u64 = 300;
pub const DEFAULT_CALL_WATCH_SECONDS: u64 = 120;
pub const DEFAULT_CALL_MAX_SECONDS: u64 = 3 * 3600;
pub const DEFAULT_MESSAGING_THRESHOLD_SECONDS: u64 = 30;
pub const DEFAULT_MESSAGING_WINDOW_SECONDS: u64 = 15 * 60;
pub const DEFAULT_AUTO_VERIFY_CONNECTIONS: u32 = 3;
pub const DEFAULT_CLASSIFIER_KEY_ENV: &str = "TETHER_CLASSIFIER_KEY";
pub const DEFAULT_CLASSIFIER_TIMEOUT_SECONDS: u64 = 15;
pub const DEFAULT_MAX_UNLOCKS_PER_DAY: u32 = 2;
pub const DEFAULT_MAX_REMINDERS_PER_DAY: u32 = 3;

/// Emergency unlocks always last this long
pub const EMERGENCY_UNLOCK_DURATION: Duration = Duration::from_secs(30 * 60);

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone)]
pub struct Policy {
    pub service: ServiceConfig,
    pub escalation: EscalationPolicy,
    pub verification: VerificationPolicy,
    pub classifier: ClassifierPolicy,
    pub rewards: RewardTable,
    pub shields: ShieldsPolicy,
    pub notifications: NotificationPolicy,
    /// Seed contacts
    pub contacts: Vec<Contact>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let escalation = EscalationPolicy::from_raw(raw.escalation);
        let shields = ShieldsPolicy {
            focus_session: DomainPolicy::from_raw(raw.shields.focus_session, true),
            daily_budget: BudgetPolicy::from_raw(raw.shields.daily_budget),
            wifi_gate: WifiGatePolicy::from_raw(raw.shields.wifi_gate),
            friction: friction_policy(raw.shields.friction, &escalation.monitored_apps),
        };

        Self {
            service: ServiceConfig::from_raw(raw.service),
            escalation,
            verification: VerificationPolicy::from_raw(raw.verification),
            classifier: ClassifierPolicy::from_raw(raw.classifier),
            rewards: RewardTable::from_raw(raw.rewards),
            shields,
            notifications: NotificationPolicy {
                max_reminders_per_day: raw
                    .notifications
                    .max_reminders_per_day
                    .unwrap_or(DEFAULT_MAX_REMINDERS_PER_DAY),
            },
            contacts: raw.contacts.into_iter().map(convert_contact).collect(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::from_raw(RawConfig {
            config_version: crate::CURRENT_CONFIG_VERSION,
            ..Default::default()
        })
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
        }
    }
}

/// Threshold ladder and night-mode window
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// Strictly increasing minute thresholds; index `i` is level `i + 1`
    pub thresholds: Vec<u32>,
    pub night: NightWindow,
    pub prosocial_enabled: bool,
    pub monitored_apps: BTreeSet<AppToken>,
}

impl EscalationPolicy {
    fn from_raw(raw: RawEscalationConfig) -> Self {
        let night = NightWindow::new(
            raw.night_start_hour.unwrap_or(DEFAULT_NIGHT_START_HOUR),
            raw.night_end_hour.unwrap_or(DEFAULT_NIGHT_END_HOUR),
        )
        .unwrap_or_else(NightWindow::disabled);

        Self {
            thresholds: raw
                .thresholds_minutes
                .unwrap_or_else(|| DEFAULT_THRESHOLDS_MINUTES.to_vec()),
            night,
            prosocial_enabled: raw.prosocial_enabled.unwrap_or(true),
            monitored_apps: convert_apps(raw.monitored_apps),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    pub call_min: Duration,
    pub long_call: Duration,
    pub call_watch: Duration,
    pub call_max: Duration,
    pub messaging_threshold: Duration,
    pub messaging_window: Duration,
    pub auto_verify_connections: u32,
}

impl VerificationPolicy {
    fn from_raw(raw: RawVerificationConfig) -> Self {
        let secs = |v: Option<u64>, d: u64| Duration::from_secs(v.unwrap_or(d));
        Self {
            call_min: secs(raw.call_min_seconds, DEFAULT_CALL_MIN_SECONDS),
            long_call: secs(raw.long_call_seconds, DEFAULT_LONG_CALL_SECONDS),
            call_watch: secs(raw.call_watch_seconds, DEFAULT_CALL_WATCH_SECONDS),
            call_max: secs(raw.call_max_seconds, DEFAULT_CALL_MAX_SECONDS),
            messaging_threshold: secs(
                raw.messaging_threshold_seconds,
                DEFAULT_MESSAGING_THRESHOLD_SECONDS,
            ),
            messaging_window: secs(
                raw.messaging_window_seconds,
                DEFAULT_MESSAGING_WINDOW_SECONDS,
            ),
            auto_verify_connections: raw
                .auto_verify_connections
                .unwrap_or(DEFAULT_AUTO_VERIFY_CONNECTIONS),
        }
    }
}

/// Remote classifier settings. The credential itself is read from the
/// environment at startup and never stored in the config file.
#[derive(Debug, Clone)]
pub struct ClassifierPolicy {
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub timeout: Duration,
}

impl ClassifierPolicy {
    fn from_raw(raw: RawClassifierConfig) -> Self {
        Self {
            endpoint: raw.endpoint,
            api_key_env: raw
                .api_key_env
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_KEY_ENV.to_string()),
            timeout: Duration::from_secs(
                raw.timeout_seconds
                    .unwrap_or(DEFAULT_CLASSIFIER_TIMEOUT_SECONDS),
            ),
        }
    }

    /// Read the credential from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// XP awarded per verification tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardTable {
    pub text_sent: u32,
    pub call_attempted: u32,
    pub call_completed: u32,
    pub long_call_5min: u32,
    pub photo_verified: u32,
    pub auto_verified: u32,
}

impl RewardTable {
    fn from_raw(raw: RawRewards) -> Self {
        let d = Self::default();
        Self {
            text_sent: raw.text_sent.unwrap_or(d.text_sent),
            call_attempted: raw.call_attempted.unwrap_or(d.call_attempted),
            call_completed: raw.call_completed.unwrap_or(d.call_completed),
            long_call_5min: raw.long_call_5min.unwrap_or(d.long_call_5min),
            photo_verified: raw.photo_verified.unwrap_or(d.photo_verified),
            auto_verified: raw.auto_verified.unwrap_or(d.auto_verified),
        }
    }
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            text_sent: 10,
            call_attempted: 5,
            call_completed: 25,
            long_call_5min: 50,
            photo_verified: 10,
            auto_verified: 0,
        }
    }
}

/// Enable flag and app set of a shield domain
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    pub enabled: bool,
    pub apps: BTreeSet<AppToken>,
}

impl DomainPolicy {
    fn from_raw(raw: RawDomain, enabled_by_default: bool) -> Self {
        Self {
            enabled: raw.enabled.unwrap_or(enabled_by_default),
            apps: convert_apps(raw.apps),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetPolicy {
    pub domain: DomainPolicy,
    pub budget_minutes: Option<u32>,
    pub max_unlocks_per_day: u32,
}

impl BudgetPolicy {
    fn from_raw(raw: RawBudgetDomain) -> Self {
        Self {
            domain: DomainPolicy {
                enabled: raw.enabled,
                apps: convert_apps(raw.apps),
            },
            budget_minutes: raw.budget_minutes,
            max_unlocks_per_day: raw
                .max_unlocks_per_day
                .unwrap_or(DEFAULT_MAX_UNLOCKS_PER_DAY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WifiGatePolicy {
    pub domain: DomainPolicy,
    pub allowed_networks: BTreeSet<String>,
}

impl WifiGatePolicy {
    fn from_raw(raw: RawWifiGateDomain) -> Self {
        Self {
            domain: DomainPolicy {
                enabled: raw.enabled,
                apps: convert_apps(raw.apps),
            },
            allowed_networks: raw.allowed_networks.into_iter().collect(),
        }
    }

    /// Unknown or absent networks are never allowed
    pub fn allows(&self, network: Option<&str>) -> bool {
        network.is_some_and(|n| self.allowed_networks.contains(n))
    }
}

/// All four shield domains
#[derive(Debug, Clone)]
pub struct ShieldsPolicy {
    pub focus_session: DomainPolicy,
    pub daily_budget: BudgetPolicy,
    pub wifi_gate: WifiGatePolicy,
    pub friction: DomainPolicy,
}

impl ShieldsPolicy {
    pub fn domain(&self, kind: ShieldDomainKind) -> &DomainPolicy {
        match kind {
            ShieldDomainKind::FocusSession => &self.focus_session,
            ShieldDomainKind::DailyBudget => &self.daily_budget.domain,
            ShieldDomainKind::WifiGate => &self.wifi_gate.domain,
            ShieldDomainKind::Friction => &self.friction,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NotificationPolicy {
    pub max_reminders_per_day: u32,
}

fn friction_policy(raw: RawDomain, monitored: &BTreeSet<AppToken>) -> DomainPolicy {
    let mut policy = DomainPolicy::from_raw(raw, true);
    if policy.apps.is_empty() {
        policy.apps = monitored.clone();
    }
    policy
}

fn convert_apps(apps: Vec<String>) -> BTreeSet<AppToken> {
    apps.into_iter().map(AppToken::new).collect()
}

fn convert_contact(raw: RawContact) -> Contact {
    Contact {
        identifier: ContactId::new(raw.id),
        name: raw.name,
        phone: raw.phone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let policy = Policy::default();
        assert_eq!(policy.escalation.thresholds, vec![5, 15, 30, 45, 60]);
        assert_eq!(policy.escalation.night, NightWindow::new(22, 6).unwrap());
        assert!(policy.escalation.prosocial_enabled);
        assert_eq!(policy.verification.call_min, Duration::from_secs(10));
        assert_eq!(policy.verification.call_watch, Duration::from_secs(120));
        assert_eq!(policy.verification.messaging_window, Duration::from_secs(900));
        assert_eq!(policy.classifier.timeout, Duration::from_secs(15));
        assert_eq!(policy.shields.daily_budget.max_unlocks_per_day, 2);
        assert!(!policy.shields.daily_budget.domain.enabled);
        assert!(policy.shields.friction.enabled);
        assert_eq!(policy.notifications.max_reminders_per_day, 3);
        assert_eq!(policy.rewards.long_call_5min, 50);
    }

    #[test]
    fn friction_defaults_to_monitored_apps() {
        let mut raw = RawConfig {
            config_version: 1,
            ..Default::default()
        };
        raw.escalation.monitored_apps = vec!["com.example.feed".into()];

        let policy = Policy::from_raw(raw);
        assert!(policy
            .shields
            .friction
            .apps
            .contains(&AppToken::new("com.example.feed")));
    }

    #[test]
    fn wifi_gate_rejects_unknown_network() {
        let gate = WifiGatePolicy {
            domain: DomainPolicy::default(),
            allowed_networks: ["home".to_string()].into_iter().collect(),
        };
        assert!(gate.allows(Some("home")));
        assert!(!gate.allows(Some("cafe")));
        assert!(!gate.allows(None));
    }

    #[test]
    fn domain_lookup() {
        let policy = Policy::default();
        assert!(!policy.shields.domain(ShieldDomainKind::WifiGate).enabled);
        assert!(policy.shields.domain(ShieldDomainKind::FocusSession).enabled);
    }
}

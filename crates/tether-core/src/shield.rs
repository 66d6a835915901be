//! Shield coordinator
//!
//! Owns the four independent app-blocking domains. Each domain is its own
//! unit of mutable state behind its own lock, so work on one domain never
//! waits on another. The daily-budget domain additionally carries the
//! emergency-unlock sub-machine.
//!
//! Lock order: the budget unlock state is always taken before the
//! daily-budget domain slot, never the other way around.

use chrono::{DateTime, Local, NaiveDate};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use tether_api::{DomainStatus, EmergencyUnlockStatus, ShieldDomainKind};
use tether_config::{EMERGENCY_UNLOCK_DURATION, ShieldsPolicy};
use tether_host_api::{HostError, HostResult, ShieldBackend};
use tether_store::{
    AuditEvent, AuditEventType, FOCUS_ENDS_AT_KEY, OVER_BUDGET_ON_KEY, Store,
    UNLOCK_EXPIRES_AT_KEY, UNLOCKS_USED_KEY, decode_day_count, encode_day_count, read_domain_active, read_timestamp,
    write_domain_state, write_timestamp,
};
use tether_util::{AppToken, DailyQuota, day_of, to_chrono};

/// Errors from domain-scoped shield requests
#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("Shield domain {0} is disabled")]
    DomainDisabled(ShieldDomainKind),

    #[error("Focus session must last at least one minute")]
    EmptySession,

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Errors from an emergency unlock request
#[derive(Debug, Error)]
pub enum UnlockError {
    #[error("Daily budget shield is disabled")]
    DomainDisabled,

    #[error("No emergency unlocks left today ({used}/{max} used)")]
    QuotaExhausted { used: u32, max: u32 },

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Emergency-unlock lifecycle of the daily-budget domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockPhase {
    Locked,
    Unlocked { expires_at: DateTime<Local> },
}

#[derive(Debug)]
struct DomainState {
    kind: ShieldDomainKind,
    enabled: bool,
    apps: BTreeSet<AppToken>,
    active: bool,
    /// End of a time-boxed activation (focus sessions only)
    until: Option<DateTime<Local>>,
}

impl DomainState {
    fn new(kind: ShieldDomainKind, enabled: bool, apps: BTreeSet<AppToken>) -> Self {
        Self {
            kind,
            enabled,
            apps,
            active: false,
            until: None,
        }
    }

    fn status(&self) -> DomainStatus {
        DomainStatus {
            kind: self.kind,
            enabled: self.enabled,
            active: self.active,
            apps: self.apps.iter().cloned().collect(),
        }
    }
}

#[derive(Debug)]
struct BudgetState {
    phase: UnlockPhase,
    unlocks: DailyQuota,
    /// Usage has reached the budget today
    over_budget: bool,
    budget_minutes: Option<u32>,
}

/// Coordinates the independent shield domains
pub struct ShieldCoordinator {
    backend: Arc<dyn ShieldBackend>,
    store: Arc<dyn Store>,
    focus_session: Mutex<DomainState>,
    daily_budget: Mutex<DomainState>,
    wifi_gate: Mutex<DomainState>,
    friction: Mutex<DomainState>,
    budget: Mutex<BudgetState>,
    allowed_networks: BTreeSet<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ShieldCoordinator {
    pub fn new(
        policy: &ShieldsPolicy,
        backend: Arc<dyn ShieldBackend>,
        store: Arc<dyn Store>,
        today: NaiveDate,
    ) -> Self {
        let slot = |kind: ShieldDomainKind| {
            let domain = policy.domain(kind);
            Mutex::new(DomainState::new(kind, domain.enabled, domain.apps.clone()))
        };

        Self {
            backend,
            store,
            focus_session: slot(ShieldDomainKind::FocusSession),
            daily_budget: slot(ShieldDomainKind::DailyBudget),
            wifi_gate: slot(ShieldDomainKind::WifiGate),
            friction: slot(ShieldDomainKind::Friction),
            budget: Mutex::new(BudgetState {
                phase: UnlockPhase::Locked,
                unlocks: DailyQuota::new(policy.daily_budget.max_unlocks_per_day, today),
                over_budget: false,
                budget_minutes: policy.daily_budget.budget_minutes,
            }),
            allowed_networks: policy.wifi_gate.allowed_networks.clone(),
        }
    }

    fn slot(&self, kind: ShieldDomainKind) -> &Mutex<DomainState> {
        match kind {
            ShieldDomainKind::FocusSession => &self.focus_session,
            ShieldDomainKind::DailyBudget => &self.daily_budget,
            ShieldDomainKind::WifiGate => &self.wifi_gate,
            ShieldDomainKind::Friction => &self.friction,
        }
    }

    fn audit(&self, event: AuditEventType) {
        let _ = self.store.append_audit(AuditEvent::new(event));
    }

    fn publish(&self, state: &DomainState) {
        if let Err(e) = write_domain_state(self.store.as_ref(), state.kind, state.active, &state.apps)
        {
            warn!(domain = %state.kind, error = %e, "Failed to publish shield state");
        }
    }

    fn apply_locked(&self, state: &mut DomainState) -> HostResult<bool> {
        if !state.enabled {
            debug!(domain = %state.kind, "Ignoring apply for disabled domain");
            return Ok(false);
        }
        if state.active {
            return Ok(false);
        }

        self.backend.apply(state.kind, &state.apps)?;
        state.active = true;
        self.publish(state);
        self.audit(AuditEventType::ShieldApplied {
            domain: state.kind,
            app_count: state.apps.len(),
        });
        info!(domain = %state.kind, apps = state.apps.len(), "Shield applied");
        Ok(true)
    }

    fn clear_locked(&self, state: &mut DomainState) -> HostResult<bool> {
        state.until = None;
        if !state.active {
            return Ok(false);
        }

        self.backend.clear(state.kind)?;
        state.active = false;
        self.publish(state);
        self.audit(AuditEventType::ShieldCleared { domain: state.kind });
        info!(domain = %state.kind, "Shield cleared");
        Ok(true)
    }

    /// Apply a domain's shield. Returns whether the domain changed state;
    /// disabled and already-active domains are left alone.
    pub fn apply(&self, kind: ShieldDomainKind) -> HostResult<bool> {
        let mut state = lock(self.slot(kind));
        self.apply_locked(&mut state)
    }

    /// Clear a domain's shield without touching any other domain
    pub fn clear(&self, kind: ShieldDomainKind) -> HostResult<bool> {
        let mut state = lock(self.slot(kind));
        self.clear_locked(&mut state)
    }

    pub fn is_enabled(&self, kind: ShieldDomainKind) -> bool {
        lock(self.slot(kind)).enabled
    }

    pub fn is_active(&self, kind: ShieldDomainKind) -> bool {
        lock(self.slot(kind)).active
    }

    pub fn status(&self, kind: ShieldDomainKind) -> DomainStatus {
        lock(self.slot(kind)).status()
    }

    pub fn statuses(&self) -> Vec<DomainStatus> {
        ShieldDomainKind::ALL
            .iter()
            .map(|kind| self.status(*kind))
            .collect()
    }

    /// The active domain credited with blocking `app`, by precedence
    pub fn blocking_domain(&self, app: &AppToken) -> Option<ShieldDomainKind> {
        ShieldDomainKind::ALL
            .iter()
            .copied()
            .filter(|kind| {
                let state = lock(self.slot(*kind));
                state.active && state.apps.contains(app)
            })
            .max_by_key(|kind| kind.precedence())
    }

    /// An app is blocked while any active domain lists it
    pub fn is_blocked(&self, app: &AppToken) -> bool {
        self.blocking_domain(app).is_some()
    }

    /// Clear the platform stores of disabled domains and re-apply whatever the
    /// shared store says was active before the restart.
    pub fn restore(&self, now: DateTime<Local>) -> HostResult<()> {
        for kind in ShieldDomainKind::ALL {
            let mut state = lock(self.slot(kind));
            if !state.enabled {
                self.backend.clear(kind)?;
                state.active = false;
                self.publish(&state);
            }
        }

        self.restore_focus(now)?;
        self.restore_budget(now)?;

        if read_domain_active(self.store.as_ref(), ShieldDomainKind::WifiGate).unwrap_or(false) {
            self.apply(ShieldDomainKind::WifiGate)?;
        }
        Ok(())
    }

    fn restore_focus(&self, now: DateTime<Local>) -> HostResult<()> {
        let ends_at = read_timestamp(self.store.as_ref(), FOCUS_ENDS_AT_KEY).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read focus session end");
            None
        });

        let mut state = lock(self.slot(ShieldDomainKind::FocusSession));
        match ends_at {
            Some(at) if at > now && state.enabled => {
                self.apply_locked(&mut state)?;
                state.until = Some(at);
                info!(ends_at = %at, "Resumed focus session");
            }
            _ => {
                // The platform store may still hold a finished session
                self.backend.clear(ShieldDomainKind::FocusSession)?;
                state.active = false;
                state.until = None;
                self.publish(&state);
                let _ = self.store.remove_shared(FOCUS_ENDS_AT_KEY);
            }
        }
        Ok(())
    }

    fn restore_budget(&self, now: DateTime<Local>) -> HostResult<()> {
        let store = self.store.as_ref();
        let today = day_of(&now);
        let mut budget = lock(&self.budget);

        if let Ok(Some(raw)) = store.get_shared(UNLOCKS_USED_KEY)
            && let Some((day, used)) = decode_day_count(&raw)
            && day == today
        {
            budget.unlocks = DailyQuota::restore(budget.unlocks.limit(), day, used);
        }

        let was_active = read_domain_active(store, ShieldDomainKind::DailyBudget).unwrap_or(false);
        let expiry = read_timestamp(store, UNLOCK_EXPIRES_AT_KEY).unwrap_or(None);
        let reached_on = store.get_shared(OVER_BUDGET_ON_KEY).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read daily budget state");
            None
        });
        budget.over_budget = reached_on.is_some_and(|day| decode_day(&day) == Some(today))
            || (was_active && expiry.is_none());

        match expiry {
            Some(at) if at > now => {
                budget.phase = UnlockPhase::Unlocked { expires_at: at };
                info!(
                    expires_at = %at,
                    over_budget = budget.over_budget,
                    "Emergency unlock still running"
                );
                // Leave the domain cleared for the rest of the unlock
                self.backend.clear(ShieldDomainKind::DailyBudget)?;
            }
            Some(at) if day_of(&at) == today => {
                info!(
                    expired_at = %at,
                    over_budget = budget.over_budget,
                    "Emergency unlock expired while down"
                );
                budget.phase = UnlockPhase::Locked;
                let _ = write_timestamp(store, UNLOCK_EXPIRES_AT_KEY, None);
                self.audit(AuditEventType::EmergencyUnlockExpired);
                if budget.over_budget {
                    self.apply(ShieldDomainKind::DailyBudget)?;
                }
            }
            Some(_) => {
                // Yesterday's unlock; the daily reset takes it from here
                let _ = write_timestamp(store, UNLOCK_EXPIRES_AT_KEY, None);
            }
            None if budget.over_budget => {
                self.apply(ShieldDomainKind::DailyBudget)?;
            }
            None => {}
        }
        Ok(())
    }

    // Focus session

    /// Start (or extend) a focus session lasting `duration`
    pub fn start_focus(
        &self,
        duration: std::time::Duration,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, ShieldError> {
        let mut state = lock(self.slot(ShieldDomainKind::FocusSession));
        if !state.enabled {
            return Err(ShieldError::DomainDisabled(ShieldDomainKind::FocusSession));
        }

        let ends_at = now + to_chrono(duration);
        self.apply_locked(&mut state)?;
        state.until = Some(ends_at);
        if let Err(e) = write_timestamp(self.store.as_ref(), FOCUS_ENDS_AT_KEY, Some(ends_at)) {
            warn!(error = %e, "Failed to persist focus session end");
        }
        Ok(ends_at)
    }

    /// End the focus session early. Returns whether one was running.
    pub fn end_focus(&self) -> HostResult<bool> {
        let mut state = lock(self.slot(ShieldDomainKind::FocusSession));
        let cleared = self.clear_locked(&mut state)?;
        let _ = self.store.remove_shared(FOCUS_ENDS_AT_KEY);
        Ok(cleared)
    }

    pub fn focus_ends_at(&self) -> Option<DateTime<Local>> {
        lock(self.slot(ShieldDomainKind::FocusSession)).until
    }

    /// Clear the focus session once its end time has passed
    pub fn expire_focus(&self, now: DateTime<Local>) -> HostResult<bool> {
        let mut state = lock(self.slot(ShieldDomainKind::FocusSession));
        match state.until {
            Some(ends_at) if now >= ends_at => {
                debug!(ends_at = %ends_at, "Focus session over");
                let cleared = self.clear_locked(&mut state)?;
                let _ = self.store.remove_shared(FOCUS_ENDS_AT_KEY);
                Ok(cleared)
            }
            _ => Ok(false),
        }
    }

    // Daily budget

    /// Feed today's cumulative usage to the budget domain. Returns whether
    /// the budget shield was newly applied.
    pub fn on_usage(&self, minutes_used: u32, now: DateTime<Local>) -> HostResult<bool> {
        let mut budget = lock(&self.budget);
        let Some(limit) = budget.budget_minutes else {
            return Ok(false);
        };
        if minutes_used < limit || !self.is_enabled(ShieldDomainKind::DailyBudget) {
            return Ok(false);
        }

        if !budget.over_budget {
            info!(minutes_used, limit, "Daily budget reached");
            let today = day_of(&now).format("%Y-%m-%d").to_string();
            if let Err(e) = self.store.set_shared(OVER_BUDGET_ON_KEY, &today) {
                warn!(error = %e, "Failed to persist daily budget state");
            }
        }
        budget.over_budget = true;

        match budget.phase {
            UnlockPhase::Unlocked { expires_at } if now < expires_at => Ok(false),
            _ => self.apply(ShieldDomainKind::DailyBudget),
        }
    }

    /// Grant a 30 minute bypass of the budget shield if today's allowance
    /// permits. Returns the expiry.
    pub fn perform_emergency_unlock(
        &self,
        now: DateTime<Local>,
    ) -> Result<DateTime<Local>, UnlockError> {
        let mut budget = lock(&self.budget);
        if !self.is_enabled(ShieldDomainKind::DailyBudget) {
            return Err(UnlockError::DomainDisabled);
        }

        let today = day_of(&now);
        let max = budget.unlocks.limit();
        if budget.unlocks.remaining(today) == 0 {
            let used = budget.unlocks.used(today);
            self.audit(AuditEventType::EmergencyUnlockDenied { used, max });
            info!(used, max, "Emergency unlock denied");
            return Err(UnlockError::QuotaExhausted { used, max });
        }

        // Clear first so a host failure consumes nothing
        self.clear(ShieldDomainKind::DailyBudget)?;
        budget.unlocks.try_consume(today);

        let expires_at = now + to_chrono(EMERGENCY_UNLOCK_DURATION);
        budget.phase = UnlockPhase::Unlocked { expires_at };
        let used = budget.unlocks.used(today);

        let store = self.store.as_ref();
        if let Err(e) = store
            .set_shared(UNLOCKS_USED_KEY, &encode_day_count(today, used))
            .and_then(|_| write_timestamp(store, UNLOCK_EXPIRES_AT_KEY, Some(expires_at)))
        {
            warn!(error = %e, "Failed to persist emergency unlock");
        }
        self.audit(AuditEventType::EmergencyUnlockGranted {
            expires_at,
            used,
            max,
        });
        info!(expires_at = %expires_at, used, max, "Emergency unlock granted");
        Ok(expires_at)
    }

    /// Whether the budget domain currently locks its apps. An unlock whose
    /// expiry has passed reads as locked even before the tick re-applies it.
    pub fn budget_locked(&self, now: DateTime<Local>) -> bool {
        let budget = lock(&self.budget);
        match budget.phase {
            UnlockPhase::Unlocked { expires_at } if now < expires_at => false,
            _ => budget.over_budget && self.is_enabled(ShieldDomainKind::DailyBudget),
        }
    }

    pub fn unlock_phase(&self) -> UnlockPhase {
        lock(&self.budget).phase
    }

    /// Move an expired unlock back to locked and keep the budget shield
    /// applied while over budget. Returns whether an unlock just expired.
    pub fn expire_unlock(&self, now: DateTime<Local>) -> HostResult<bool> {
        let mut budget = lock(&self.budget);
        let mut expired = false;

        if let UnlockPhase::Unlocked { expires_at } = budget.phase
            && now >= expires_at
        {
            budget.phase = UnlockPhase::Locked;
            expired = true;
            let _ = write_timestamp(self.store.as_ref(), UNLOCK_EXPIRES_AT_KEY, None);
            self.audit(AuditEventType::EmergencyUnlockExpired);
            info!(expired_at = %expires_at, "Emergency unlock expired");
        }

        if budget.phase == UnlockPhase::Locked && budget.over_budget {
            self.apply(ShieldDomainKind::DailyBudget)?;
        }
        Ok(expired)
    }

    pub fn unlock_status(&self, now: DateTime<Local>) -> EmergencyUnlockStatus {
        let budget = lock(&self.budget);
        let today = day_of(&now);
        let expires_at = match budget.phase {
            UnlockPhase::Unlocked { expires_at } if now < expires_at => Some(expires_at),
            _ => None,
        };
        EmergencyUnlockStatus {
            active: expires_at.is_some(),
            expires_at,
            unlocks_used_today: budget.unlocks.used(today),
            max_unlocks_per_day: budget.unlocks.limit(),
        }
    }

    pub fn unlocks_remaining(&self, today: NaiveDate) -> u32 {
        lock(&self.budget).unlocks.remaining(today)
    }

    /// Start the budget domain over for a new day
    pub fn reset_daily(&self, today: NaiveDate) -> HostResult<bool> {
        let mut budget = lock(&self.budget);
        budget.phase = UnlockPhase::Locked;
        budget.over_budget = false;
        budget.unlocks.reset(today);

        let store = self.store.as_ref();
        if let Err(e) = store
            .set_shared(UNLOCKS_USED_KEY, &encode_day_count(today, 0))
            .and_then(|_| write_timestamp(store, UNLOCK_EXPIRES_AT_KEY, None))
            .and_then(|_| store.remove_shared(OVER_BUDGET_ON_KEY))
        {
            warn!(error = %e, "Failed to persist budget reset");
        }
        debug!(day = %today, "Daily budget reset");
        self.clear(ShieldDomainKind::DailyBudget)
    }

    // Wi-Fi gate

    /// React to the current network. Returns the new active state if it changed.
    pub fn on_network(&self, network: Option<&str>) -> HostResult<Option<bool>> {
        if !self.is_enabled(ShieldDomainKind::WifiGate) {
            return Ok(None);
        }

        let allowed = network.is_some_and(|n| self.allowed_networks.contains(n));
        debug!(network = ?network, allowed, "Network changed");
        let changed = if allowed {
            self.clear(ShieldDomainKind::WifiGate)?
        } else {
            self.apply(ShieldDomainKind::WifiGate)?
        };
        Ok(changed.then_some(!allowed))
    }
}

fn decode_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tether_config::{BudgetPolicy, DomainPolicy, WifiGatePolicy};
    use tether_host_api::MockShieldBackend;
    use tether_store::SqliteStore;

    fn apps(names: &[&str]) -> BTreeSet<AppToken> {
        names.iter().map(|n| AppToken::new(*n)).collect()
    }

    fn domain(names: &[&str]) -> DomainPolicy {
        DomainPolicy {
            enabled: true,
            apps: apps(names),
        }
    }

    fn policy() -> ShieldsPolicy {
        ShieldsPolicy {
            focus_session: domain(&["feed", "video"]),
            daily_budget: BudgetPolicy {
                domain: domain(&["feed", "games"]),
                budget_minutes: Some(60),
                max_unlocks_per_day: 2,
            },
            wifi_gate: WifiGatePolicy {
                domain: domain(&["games"]),
                allowed_networks: ["home".to_string()].into_iter().collect(),
            },
            friction: domain(&["feed"]),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    fn make(policy: &ShieldsPolicy) -> (ShieldCoordinator, Arc<MockShieldBackend>, Arc<SqliteStore>) {
        let backend = Arc::new(MockShieldBackend::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let coordinator =
            ShieldCoordinator::new(policy, backend.clone(), store.clone(), day_of(&at(9, 0)));
        (coordinator, backend, store)
    }

    #[test]
    fn apply_is_idempotent() {
        let (shields, backend, _) = make(&policy());

        assert!(shields.apply(ShieldDomainKind::Friction).unwrap());
        assert!(!shields.apply(ShieldDomainKind::Friction).unwrap());
        assert_eq!(backend.apply_calls(), 1);

        assert!(shields.clear(ShieldDomainKind::Friction).unwrap());
        assert!(!shields.clear(ShieldDomainKind::Friction).unwrap());
    }

    #[test]
    fn clearing_focus_leaves_budget_alone() {
        let (shields, backend, _) = make(&policy());

        shields.start_focus(std::time::Duration::from_secs(1800), at(9, 0)).unwrap();
        shields.on_usage(60, at(9, 0)).unwrap();
        assert!(shields.budget_locked(at(9, 0)));

        shields.end_focus().unwrap();

        assert!(!shields.is_active(ShieldDomainKind::FocusSession));
        assert!(shields.is_active(ShieldDomainKind::DailyBudget));
        assert!(shields.budget_locked(at(9, 0)));
        assert_eq!(
            backend.blocked(ShieldDomainKind::DailyBudget),
            apps(&["feed", "games"])
        );
        assert!(backend.blocked(ShieldDomainKind::FocusSession).is_empty());
        // Still blocked through the budget domain
        assert!(backend.is_blocked(&AppToken::new("feed")));
        assert!(!backend.is_blocked(&AppToken::new("video")));
    }

    #[test]
    fn disabled_domain_ignores_apply() {
        let mut policy = policy();
        policy.wifi_gate.domain.enabled = false;
        let (shields, backend, _) = make(&policy);

        assert!(!shields.apply(ShieldDomainKind::WifiGate).unwrap());
        assert_eq!(shields.on_network(None).unwrap(), None);
        assert_eq!(backend.apply_calls(), 0);
    }

    #[test]
    fn emergency_unlock_quota_and_expiry() {
        let (shields, _, _) = make(&policy());
        shields.on_usage(75, at(10, 0)).unwrap();
        assert!(shields.budget_locked(at(10, 0)));

        let expires_at = shields.perform_emergency_unlock(at(10, 0)).unwrap();
        assert_eq!(expires_at, at(10, 30));
        assert!(!shields.budget_locked(at(10, 0)));
        assert!(!shields.budget_locked(at(10, 29)));
        // Locked again once the 30 minutes are up, before any tick
        assert!(shields.budget_locked(at(10, 30)));

        assert!(shields.expire_unlock(at(10, 30)).unwrap());
        assert!(shields.is_active(ShieldDomainKind::DailyBudget));

        shields.perform_emergency_unlock(at(11, 0)).unwrap();
        let err = shields.perform_emergency_unlock(at(11, 5)).unwrap_err();
        assert!(matches!(err, UnlockError::QuotaExhausted { used: 2, max: 2 }));

        let status = shields.unlock_status(at(11, 5));
        assert!(status.active);
        assert_eq!(status.unlocks_used_today, 2);
    }

    #[test]
    fn usage_during_unlock_does_not_relock() {
        let (shields, _, _) = make(&policy());
        shields.on_usage(60, at(10, 0)).unwrap();
        shields.perform_emergency_unlock(at(10, 0)).unwrap();

        assert!(!shields.on_usage(70, at(10, 10)).unwrap());
        assert!(!shields.is_active(ShieldDomainKind::DailyBudget));
    }

    #[test]
    fn failed_clear_consumes_no_unlock() {
        let (shields, backend, _) = make(&policy());
        shields.on_usage(60, at(10, 0)).unwrap();

        *backend.fail.lock().unwrap() = true;
        assert!(matches!(
            shields.perform_emergency_unlock(at(10, 0)),
            Err(UnlockError::Host(_))
        ));
        assert_eq!(shields.unlocks_remaining(day_of(&at(10, 0))), 2);
    }

    #[test]
    fn zero_max_unlocks_denies() {
        let mut policy = policy();
        policy.daily_budget.max_unlocks_per_day = 0;
        let (shields, _, _) = make(&policy);

        assert!(matches!(
            shields.perform_emergency_unlock(at(10, 0)),
            Err(UnlockError::QuotaExhausted { used: 0, max: 0 })
        ));
    }

    #[test]
    fn restore_relocks_after_past_expiry() {
        let policy = policy();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        {
            let backend = Arc::new(MockShieldBackend::new());
            let shields =
                ShieldCoordinator::new(&policy, backend, store.clone(), day_of(&at(10, 0)));
            shields.on_usage(60, at(10, 0)).unwrap();
            shields.perform_emergency_unlock(at(10, 0)).unwrap();
        }

        let backend = Arc::new(MockShieldBackend::new());
        let shields =
            ShieldCoordinator::new(&policy, backend.clone(), store.clone(), day_of(&at(11, 0)));
        shields.restore(at(11, 0)).unwrap();

        assert_eq!(shields.unlock_phase(), UnlockPhase::Locked);
        assert!(shields.is_active(ShieldDomainKind::DailyBudget));
        assert!(backend.is_blocked(&AppToken::new("games")));
        assert_eq!(shields.unlocks_remaining(day_of(&at(11, 0))), 1);
        assert!(
            read_timestamp(store.as_ref(), UNLOCK_EXPIRES_AT_KEY)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn restore_keeps_running_unlock() {
        let policy = policy();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        {
            let shields = ShieldCoordinator::new(
                &policy,
                Arc::new(MockShieldBackend::new()),
                store.clone(),
                day_of(&at(10, 0)),
            );
            shields.on_usage(60, at(10, 0)).unwrap();
            shields.perform_emergency_unlock(at(10, 0)).unwrap();
        }

        let shields = ShieldCoordinator::new(
            &policy,
            Arc::new(MockShieldBackend::new()),
            store,
            day_of(&at(10, 10)),
        );
        shields.restore(at(10, 10)).unwrap();

        assert!(!shields.budget_locked(at(10, 10)));
        assert!(shields.budget_locked(at(10, 31)));
    }

    #[test]
    fn restore_unlock_taken_under_budget_stays_unlocked() {
        let policy = policy();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        {
            let shields = ShieldCoordinator::new(
                &policy,
                Arc::new(MockShieldBackend::new()),
                store.clone(),
                day_of(&at(10, 0)),
            );
            shields.on_usage(30, at(10, 0)).unwrap();
            shields.perform_emergency_unlock(at(10, 0)).unwrap();
        }

        let restart = |now: DateTime<Local>| {
            let backend = Arc::new(MockShieldBackend::new());
            let shields =
                ShieldCoordinator::new(&policy, backend.clone(), store.clone(), day_of(&now));
            shields.restore(now).unwrap();
            (shields, backend)
        };

        let (shields, _) = restart(at(10, 10));
        assert!(!shields.budget_locked(at(10, 10)));
        assert!(!shields.budget_locked(at(10, 31)));

        // Expired while down, but usage never reached the budget
        let (shields, backend) = restart(at(10, 45));
        assert_eq!(shields.unlock_phase(), UnlockPhase::Locked);
        assert!(!shields.budget_locked(at(10, 45)));
        assert!(!shields.is_active(ShieldDomainKind::DailyBudget));
        assert!(backend.blocked(ShieldDomainKind::DailyBudget).is_empty());

        // Reaching the budget afterwards still locks
        assert!(shields.on_usage(60, at(11, 0)).unwrap());
        assert!(shields.budget_locked(at(11, 0)));
    }

    #[test]
    fn reset_daily_forgets_budget_reached() {
        let (shields, _, store) = make(&policy());
        shields.on_usage(60, at(10, 0)).unwrap();
        assert!(store.get_shared(OVER_BUDGET_ON_KEY).unwrap().is_some());

        let tomorrow = day_of(&at(10, 0)).succ_opt().unwrap();
        shields.reset_daily(tomorrow).unwrap();
        assert!(store.get_shared(OVER_BUDGET_ON_KEY).unwrap().is_none());
    }

    #[test]
    fn reset_daily_zeroes_counter_and_unlocks() {
        let (shields, backend, _) = make(&policy());
        shields.on_usage(60, at(10, 0)).unwrap();
        shields.perform_emergency_unlock(at(10, 0)).unwrap();
        shields.expire_unlock(at(10, 30)).unwrap();

        let tomorrow = day_of(&at(10, 0)).succ_opt().unwrap();
        shields.reset_daily(tomorrow).unwrap();

        assert_eq!(shields.unlocks_remaining(tomorrow), 2);
        assert!(!shields.is_active(ShieldDomainKind::DailyBudget));
        assert!(backend.blocked(ShieldDomainKind::DailyBudget).is_empty());
    }

    #[test]
    fn focus_session_expires() {
        let (shields, _, store) = make(&policy());
        let ends_at = shields
            .start_focus(std::time::Duration::from_secs(25 * 60), at(9, 0))
            .unwrap();
        assert_eq!(ends_at, at(9, 25));
        assert!(
            read_timestamp(store.as_ref(), FOCUS_ENDS_AT_KEY)
                .unwrap()
                .is_some()
        );

        assert!(!shields.expire_focus(at(9, 24)).unwrap());
        assert!(shields.expire_focus(at(9, 25)).unwrap());
        assert!(!shields.is_active(ShieldDomainKind::FocusSession));
        assert!(shields.focus_ends_at().is_none());
    }

    #[test]
    fn disabled_focus_session_is_an_error() {
        let mut policy = policy();
        policy.focus_session.enabled = false;
        let (shields, _, _) = make(&policy);

        assert!(matches!(
            shields.start_focus(std::time::Duration::from_secs(60), at(9, 0)),
            Err(ShieldError::DomainDisabled(ShieldDomainKind::FocusSession))
        ));
    }

    #[test]
    fn wifi_gate_follows_network() {
        let (shields, _, _) = make(&policy());

        assert_eq!(shields.on_network(Some("cafe")).unwrap(), Some(true));
        assert_eq!(shields.on_network(None).unwrap(), None);
        assert_eq!(shields.on_network(Some("home")).unwrap(), Some(false));
        assert!(!shields.is_active(ShieldDomainKind::WifiGate));
    }

    #[test]
    fn blocking_domain_uses_precedence() {
        let (shields, _, _) = make(&policy());
        let feed = AppToken::new("feed");

        shields.apply(ShieldDomainKind::FocusSession).unwrap();
        assert_eq!(
            shields.blocking_domain(&feed),
            Some(ShieldDomainKind::FocusSession)
        );
        shields.apply(ShieldDomainKind::Friction).unwrap();
        assert_eq!(shields.blocking_domain(&feed), Some(ShieldDomainKind::Friction));
        shields.on_usage(60, at(9, 0)).unwrap();
        assert_eq!(
            shields.blocking_domain(&feed),
            Some(ShieldDomainKind::DailyBudget)
        );
        assert_eq!(shields.blocking_domain(&AppToken::new("mail")), None);
    }

    #[test]
    fn state_published_to_shared_store() {
        let (shields, _, store) = make(&policy());
        shields.apply(ShieldDomainKind::Friction).unwrap();
        assert!(read_domain_active(store.as_ref(), ShieldDomainKind::Friction).unwrap());
        assert!(!read_domain_active(store.as_ref(), ShieldDomainKind::FocusSession).unwrap());
    }
}

//! Core escalation engine
//!
//! Composes the usage monitor, the escalation controller, the verification
//! strategies and the shield coordinator. The engine is driven by commands
//! from the bridge and by a once-per-second tick; every entry point takes
//! the current time and returns the events to broadcast.

use chrono::{DateTime, Local};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use tether_api::{
    API_VERSION, Challenge, ChallengeKind, Contact, EngineStateSnapshot, HealthStatus,
    Intervention, MessagingStatus, SceneCategory, ShieldDomainKind, TelephonySignal,
    VerificationMethod, VerificationOutcome,
};
use tether_config::Policy;
use tether_host_api::{DeepLinker, HostError, Notifier, ShieldBackend};
use tether_store::{
    AuditEvent, AuditEventType, MESSAGING_REACHED, REMINDERS_USED_KEY, Store, decode_day_count,
    encode_day_count, messaging_key,
};
use tether_util::{ChallengeId, DailyQuota, TetherError, day_of};

use crate::verify::{
    CallRules, CallVerifier, MessagingVerifier, StrategyOutcome, WatchStrategy,
    genuine_connections_today, should_auto_verify,
};
use crate::{
    CoreEvent, EscalationController, ShieldCoordinator, ShieldError, ThresholdLadder, UnlockError,
    UsageMonitor, STALE_CONTACT_DAYS, select_contact,
};

/// What the daemon needs to classify a photo off the engine's path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRequest {
    pub challenge_id: ChallengeId,
    pub scene: SceneCategory,
    pub reward_xp: u32,
    pub timeout: Duration,
}

/// A granted emergency unlock
#[derive(Debug, Clone)]
pub struct UnlockGrant {
    pub expires_at: DateTime<Local>,
    pub unlocks_remaining: u32,
    pub events: Vec<CoreEvent>,
}

/// The escalation and verification engine
pub struct CoreEngine {
    policy: Policy,
    store: Arc<dyn Store>,
    shield_backend: Arc<dyn ShieldBackend>,
    deep_linker: Arc<dyn DeepLinker>,
    notifier: Arc<dyn Notifier>,
    monitor: UsageMonitor,
    escalation: EscalationController,
    calls: CallVerifier,
    messaging: MessagingVerifier,
    shields: ShieldCoordinator,
    /// Challenges that are neither verified nor skipped
    challenges: BTreeMap<ChallengeId, Challenge>,
    reminders: DailyQuota,
    hard_friction: bool,
    rng: StdRng,
}

impl CoreEngine {
    pub fn new(
        policy: Policy,
        store: Arc<dyn Store>,
        shield_backend: Arc<dyn ShieldBackend>,
        deep_linker: Arc<dyn DeepLinker>,
        notifier: Arc<dyn Notifier>,
        now: DateTime<Local>,
    ) -> Self {
        let today = day_of(&now);
        let ladder = ThresholdLadder::new(
            policy.escalation.thresholds.clone(),
            policy.escalation.night,
        );

        for contact in &policy.contacts {
            if let Err(e) = store.upsert_contact(contact) {
                warn!(contact = %contact.identifier, error = %e, "Failed to seed contact");
            }
        }

        info!(
            levels = ladder.len(),
            contacts = policy.contacts.len(),
            prosocial = policy.escalation.prosocial_enabled,
            "Core engine initialized"
        );

        Self {
            monitor: UsageMonitor::new(ladder.clone()),
            escalation: EscalationController::new(
                ladder,
                policy.escalation.prosocial_enabled,
                today,
            ),
            calls: CallVerifier::new(CallRules::from_policy(
                &policy.verification,
                &policy.rewards,
            )),
            messaging: MessagingVerifier::new(
                policy.verification.messaging_threshold,
                policy.verification.messaging_window,
                policy.rewards.text_sent,
            ),
            shields: ShieldCoordinator::new(
                &policy.shields,
                shield_backend.clone(),
                store.clone(),
                today,
            ),
            challenges: BTreeMap::new(),
            reminders: DailyQuota::new(policy.notifications.max_reminders_per_day, today),
            hard_friction: false,
            rng: StdRng::from_entropy(),
            policy,
            store,
            shield_backend,
            deep_linker,
            notifier,
        }
    }

    /// Replace the contact-selection rng
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn shields(&self) -> &ShieldCoordinator {
        &self.shields
    }

    pub fn open_challenges(&self) -> impl Iterator<Item = &Challenge> {
        self.challenges.values()
    }

    pub fn minutes_used(&self) -> u32 {
        self.monitor.minutes_used()
    }

    pub fn current_level(&self) -> u8 {
        self.escalation.current_level()
    }

    pub fn hard_friction(&self) -> bool {
        self.hard_friction
    }

    fn audit(&self, event: AuditEventType) {
        let _ = self.store.append_audit(AuditEvent::new(event));
    }

    fn persist_escalation(&self) {
        let snapshot = self
            .escalation
            .snapshot(self.monitor.minutes_used(), self.hard_friction);
        if let Err(e) = self.store.save_escalation(&snapshot) {
            warn!(error = %e, "Failed to persist escalation state");
        }
    }

    fn persist_challenge(&self, challenge: &Challenge) {
        if let Err(e) = self.store.save_challenge(challenge) {
            warn!(challenge_id = %challenge.id, error = %e, "Failed to persist challenge");
        }
    }

    fn contacts(&self) -> Vec<Contact> {
        self.store.list_contacts().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load contacts");
            Vec::new()
        })
    }

    /// Adopt persisted state after a restart.
    ///
    /// A snapshot from an earlier day triggers the daily reset, catching a
    /// rollover that happened while the daemon was down.
    pub fn restore(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let today = day_of(&now);
        let mut events = Vec::new();

        if let Err(e) = self.shields.restore(now) {
            warn!(error = %e, "Failed to restore shield state");
        }

        match self.store.load_escalation() {
            Ok(Some(snapshot)) if snapshot.day == today => {
                self.escalation.restore(&snapshot);
                self.monitor.restore(
                    snapshot.minutes_used,
                    snapshot.fired_levels.iter().map(|&i| i as usize),
                );
                self.hard_friction = snapshot.hard_friction;
                info!(
                    level = snapshot.current_level,
                    minutes_used = snapshot.minutes_used,
                    "Restored escalation state"
                );
            }
            Ok(Some(snapshot)) => {
                info!(last_day = %snapshot.day, "Escalation state is from an earlier day");
                events.extend(self.reset_for_new_day(now));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load escalation state"),
        }

        match self.store.open_challenges() {
            Ok(open) => {
                for challenge in open {
                    self.challenges.insert(challenge.id, challenge);
                }
            }
            Err(e) => warn!(error = %e, "Failed to load open challenges"),
        }
        self.resume_watches(now);

        if let Ok(Some(raw)) = self.store.get_shared(REMINDERS_USED_KEY)
            && let Some((day, used)) = decode_day_count(&raw)
            && day == today
        {
            self.reminders = DailyQuota::restore(self.reminders.limit(), day, used);
        }

        events.extend(self.update_friction());
        events
    }

    /// Rebuild verification watches for challenges begun before the restart,
    /// most recently begun first
    fn resume_watches(&mut self, now: DateTime<Local>) {
        let mut begun: Vec<(DateTime<Local>, Challenge)> = self
            .challenges
            .values()
            .filter_map(|c| c.started_at.map(|at| (at, c.clone())))
            .collect();
        begun.sort_by(|a, b| b.0.cmp(&a.0));

        let mut call_resumed = false;
        for (started_at, challenge) in &begun {
            match challenge.kind {
                ChallengeKind::Text => self.messaging.resume(challenge, *started_at, now),
                ChallengeKind::Call if !call_resumed => {
                    call_resumed = self.calls.resume(challenge, *started_at, now);
                }
                _ => {}
            }
        }
        if !begun.is_empty() {
            debug!(begun = begun.len(), call_resumed, "Verification watches resumed");
        }
    }

    // Usage

    /// Record cumulative minutes of monitored-app usage today
    pub fn record_usage(&mut self, minutes_used: u32, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = self.roll_day_if_needed(now);

        let crossed = self.monitor.observe(minutes_used, &now);
        let minutes_used = self.monitor.minutes_used();

        match self.shields.on_usage(minutes_used, now) {
            Ok(true) => events.push(CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::DailyBudget,
                active: true,
            }),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to apply daily budget shield"),
        }

        if !crossed.is_empty() {
            debug!(?crossed, "Usage thresholds crossed");
            if let Some(level) = self.escalation.check_threshold(minutes_used, &now) {
                events.extend(self.handle_level(level, now));
            }
        }

        self.persist_escalation();
        events
    }

    fn handle_level(&mut self, level: u8, now: DateTime<Local>) -> Vec<CoreEvent> {
        self.audit(AuditEventType::LevelReached {
            level,
            minutes_used: self.monitor.minutes_used(),
        });

        let contacts = self.contacts();
        let intervention = self.escalation.intervention_for(level, !contacts.is_empty());
        let mut events = vec![CoreEvent::LevelReached {
            level,
            intervention,
            prosocial: intervention.is_prosocial(),
        }];

        match intervention {
            Intervention::Nudge => {
                let message = format!(
                    "You've spent {} minutes in these apps today. Time for a break?",
                    self.monitor.minutes_used()
                );
                events.extend(self.send_reminder(&message, now));
            }
            Intervention::HardFriction => {
                if !self.hard_friction {
                    info!(level, "Hard friction engaged until the next daily reset");
                }
                self.hard_friction = true;
                events.extend(self.update_friction());
            }
            Intervention::BreathingExercise | Intervention::MoodCheckIn => {}
            Intervention::TextChallenge
            | Intervention::CallChallenge
            | Intervention::GroundingChallenge { .. } => {
                if let Some(kind) = intervention.challenge_kind() {
                    events.extend(self.issue_challenge(kind, level, &contacts, now));
                }
            }
        }
        events
    }

    fn issue_challenge(
        &mut self,
        kind: ChallengeKind,
        level: u8,
        contacts: &[Contact],
        now: DateTime<Local>,
    ) -> Vec<CoreEvent> {
        let monitored = &self.policy.escalation.monitored_apps;
        let target_app = match monitored.len() {
            1 => monitored.iter().next().cloned(),
            _ => None,
        };
        let mut challenge = Challenge::new(kind, level, now).with_target_app(target_app);

        let recent = if kind.is_prosocial() {
            let since = now - chrono::Duration::days(STALE_CONTACT_DAYS);
            self.store.connections_since(since).unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load connection log");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        if kind.is_prosocial()
            && let Some(contact) = select_contact(contacts, &recent, now, &mut self.rng)
        {
            challenge = challenge.with_contact(contact);
        }

        info!(
            challenge_id = %challenge.id,
            level,
            kind = kind_label(&kind),
            contact = ?challenge.contact_name,
            "Challenge issued"
        );
        self.persist_challenge(&challenge);
        self.audit(AuditEventType::ChallengeIssued {
            challenge_id: challenge.id,
            level,
            kind: kind_label(&kind).to_string(),
        });

        let id = challenge.id;
        let mut events = vec![CoreEvent::ChallengeIssued(challenge.clone())];
        self.challenges.insert(id, challenge);

        let required = self.policy.verification.auto_verify_connections;
        if kind.is_prosocial() && should_auto_verify(&recent, &now, required) {
            let connections = genuine_connections_today(&recent, &now);
            info!(challenge_id = %id, connections, "Auto-verifying challenge");
            events.extend(self.resolve(
                StrategyOutcome {
                    challenge_id: id,
                    outcome: VerificationOutcome::verified(
                        self.policy.rewards.auto_verified,
                        format!(
                            "You've already connected with people {connections} times today. Challenge complete!"
                        ),
                    ),
                    method: VerificationMethod::AutoVerified,
                    connection: None,
                },
                now,
            ));
        } else {
            events.extend(self.update_friction());
        }
        events
    }

    // Challenges

    fn open_challenge(&self, id: &ChallengeId) -> tether_util::Result<&Challenge> {
        if let Some(challenge) = self.challenges.get(id) {
            return Ok(challenge);
        }
        match self.store.get_challenge(id) {
            Ok(Some(challenge)) if challenge.is_terminal() => {
                Err(TetherError::ChallengeResolved(*id))
            }
            _ => Err(TetherError::ChallengeNotFound(*id)),
        }
    }

    /// Open the deep link for a challenge and start its verification watch.
    /// Beginning again after a failed outcome starts a fresh watch.
    pub fn begin_challenge(
        &mut self,
        id: &ChallengeId,
        now: DateTime<Local>,
    ) -> tether_util::Result<Challenge> {
        let mut challenge = self.open_challenge(id)?.clone();

        match challenge.kind {
            ChallengeKind::Call => {
                self.deep_linker
                    .open(challenge.kind, challenge.contact_phone.as_deref())
                    .map_err(|e| TetherError::host(e.to_string()))?;
                self.calls.start(&challenge, now);
            }
            ChallengeKind::Text => {
                self.deep_linker
                    .open(challenge.kind, challenge.contact_phone.as_deref())
                    .map_err(|e| TetherError::host(e.to_string()))?;
                if let Err(e) = self.store.remove_shared(&messaging_key(id)) {
                    warn!(challenge_id = %id, error = %e, "Failed to clear messaging confirmation");
                }
                self.messaging.start(&challenge, now);
            }
            // The shell captures the photo itself
            ChallengeKind::Grounding { .. } => {}
        }

        challenge.started_at = Some(now);
        self.persist_challenge(&challenge);
        self.challenges.insert(*id, challenge.clone());

        debug!(challenge_id = %id, kind = kind_label(&challenge.kind), "Challenge started");
        Ok(challenge)
    }

    /// Skip an open challenge. Pending watches for it are cancelled.
    pub fn skip_challenge(
        &mut self,
        id: &ChallengeId,
        _now: DateTime<Local>,
    ) -> tether_util::Result<Vec<CoreEvent>> {
        self.open_challenge(id)?;
        let Some(mut challenge) = self.challenges.remove(id) else {
            return Err(TetherError::ChallengeNotFound(*id));
        };

        self.calls.cancel(id);
        self.messaging.cancel(id);
        challenge.was_skipped = true;
        self.persist_challenge(&challenge);
        self.audit(AuditEventType::ChallengeSkipped { challenge_id: *id });
        info!(challenge_id = %id, "Challenge skipped");

        let mut events = vec![CoreEvent::ChallengeSkipped { challenge_id: *id }];
        events.extend(self.update_friction());
        Ok(events)
    }

    pub fn on_telephony(&mut self, signal: TelephonySignal, now: DateTime<Local>) -> Vec<CoreEvent> {
        match self.calls.on_signal(signal) {
            Some(outcome) => self.resolve(outcome, now),
            None => Vec::new(),
        }
    }

    /// Cumulative messaging foreground time pushed by the platform monitor
    pub fn on_messaging_foreground(
        &mut self,
        challenge_id: Option<ChallengeId>,
        seconds: u64,
        now: DateTime<Local>,
    ) -> Vec<CoreEvent> {
        match self
            .messaging
            .on_foreground(challenge_id, Duration::from_secs(seconds), now)
        {
            Some(outcome) => self.resolve(outcome, now),
            None => Vec::new(),
        }
    }

    /// Check a text challenge's messaging watch, picking up a confirmation
    /// the platform monitor left in the shared store.
    pub fn poll_messaging(
        &mut self,
        id: &ChallengeId,
        now: DateTime<Local>,
    ) -> (MessagingStatus, Vec<CoreEvent>) {
        let mut events = Vec::new();
        let key = messaging_key(id);

        let reached = match self.store.get_shared(&key) {
            Ok(value) => value.as_deref() == Some(MESSAGING_REACHED),
            Err(e) => {
                warn!(challenge_id = %id, error = %e, "Failed to read messaging confirmation");
                false
            }
        };

        if reached {
            // The key stays until it settles something or its challenge is gone
            let consumed = match self.messaging.confirm(id, now) {
                Some(outcome) => {
                    events.extend(self.resolve(outcome, now));
                    true
                }
                None => !self.challenges.contains_key(id),
            };
            if consumed && let Err(e) = self.store.remove_shared(&key) {
                warn!(challenge_id = %id, error = %e, "Failed to clear messaging confirmation");
            }
        }

        (self.messaging.poll(id, now), events)
    }

    /// Parameters for classifying a photo submitted for a grounding challenge
    pub fn photo_request(&self, id: &ChallengeId) -> tether_util::Result<PhotoRequest> {
        let challenge = self.open_challenge(id)?;
        let ChallengeKind::Grounding { scene } = challenge.kind else {
            return Err(TetherError::validation(format!(
                "Challenge {} does not take a photo",
                id
            )));
        };

        Ok(PhotoRequest {
            challenge_id: *id,
            scene,
            reward_xp: self.policy.rewards.photo_verified,
            timeout: self.policy.classifier.timeout,
        })
    }

    /// Apply a classification result. Verdicts for challenges resolved or
    /// skipped in the meantime are dropped.
    pub fn apply_photo_verdict(
        &mut self,
        id: &ChallengeId,
        outcome: VerificationOutcome,
        now: DateTime<Local>,
    ) -> Vec<CoreEvent> {
        self.resolve(
            StrategyOutcome {
                challenge_id: *id,
                outcome,
                method: VerificationMethod::PhotoAi,
                connection: None,
            },
            now,
        )
    }

    /// Apply a strategy outcome to its challenge.
    ///
    /// A failed outcome is reported but leaves the challenge open.
    fn resolve(&mut self, result: StrategyOutcome, now: DateTime<Local>) -> Vec<CoreEvent> {
        let StrategyOutcome {
            challenge_id,
            outcome,
            method,
            connection,
        } = result;

        let Some(challenge) = self.challenges.get_mut(&challenge_id) else {
            debug!(%challenge_id, ?method, "Dropping outcome for a challenge that is no longer open");
            return Vec::new();
        };

        info!(
            %challenge_id,
            ?method,
            xp = outcome.xp(),
            message = outcome.message(),
            "Challenge outcome"
        );
        let mut events = vec![CoreEvent::ChallengeResolved {
            challenge_id,
            outcome: outcome.clone(),
            method,
        }];

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ChallengeResolved {
            challenge_id,
            outcome: outcome_label(&outcome).to_string(),
            method: Some(method),
            xp: outcome.xp(),
        }));

        if !outcome.counts() {
            return events;
        }

        challenge.was_verified = true;
        challenge.verification_method = Some(method);
        challenge.xp_earned = outcome.xp();
        challenge.verified_at = Some(now);
        let challenge = challenge.clone();
        self.challenges.remove(&challenge_id);
        self.persist_challenge(&challenge);

        if let Some(entry) = connection
            && let Err(e) = self.store.append_connection(&entry)
        {
            warn!(%challenge_id, error = %e, "Failed to log connection");
        }

        self.calls.cancel(&challenge_id);
        // A verified messaging watch stays pollable
        if method != VerificationMethod::CommunicationCategory {
            self.messaging.cancel(&challenge_id);
        }

        events.extend(self.update_friction());
        events
    }

    /// Friction is applied while hard friction is engaged or any challenge is open
    fn update_friction(&mut self) -> Vec<CoreEvent> {
        let wanted = self.hard_friction || !self.challenges.is_empty();
        let result = if wanted {
            self.shields.apply(ShieldDomainKind::Friction)
        } else {
            self.shields.clear(ShieldDomainKind::Friction)
        };

        match result {
            Ok(true) => vec![CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::Friction,
                active: wanted,
            }],
            Ok(false) => Vec::new(),
            Err(e) => {
                warn!(error = %e, wanted, "Failed to update friction shield");
                Vec::new()
            }
        }
    }

    // Timers

    /// Deliver everything that has come due: call-watch timeouts, messaging
    /// windows, focus session end, unlock expiry and day rollover.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = self.roll_day_if_needed(now);

        if let Some(outcome) = self.calls.tick(now) {
            events.extend(self.resolve(outcome, now));
        }
        self.messaging.tick(now);

        match self.shields.expire_focus(now) {
            Ok(true) => events.push(CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::FocusSession,
                active: false,
            }),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to end focus session"),
        }

        match self.shields.expire_unlock(now) {
            Ok(true) => {
                events.push(CoreEvent::EmergencyUnlockExpired);
                if self.shields.is_active(ShieldDomainKind::DailyBudget) {
                    events.push(CoreEvent::ShieldChanged {
                        domain: ShieldDomainKind::DailyBudget,
                        active: true,
                    });
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to re-lock daily budget"),
        }

        events
    }

    fn roll_day_if_needed(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        if day_of(&now) != self.escalation.day() {
            self.reset_for_new_day(now)
        } else {
            Vec::new()
        }
    }

    /// Start a new calendar day. Runs at most once per day.
    pub fn reset_for_new_day(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let today = day_of(&now);
        if !self.escalation.reset_for_new_day(today) {
            return Vec::new();
        }

        self.monitor.reset();
        self.hard_friction = false;
        let pruned = self.messaging.prune(|id| self.challenges.contains_key(id));
        if pruned > 0 {
            debug!(pruned, "Dropped closed messaging watches");
        }
        self.reminders.reset(today);
        let _ = self
            .store
            .set_shared(REMINDERS_USED_KEY, &encode_day_count(today, 0));

        let mut events = Vec::new();
        match self.shields.reset_daily(today) {
            Ok(true) => events.push(CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::DailyBudget,
                active: false,
            }),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to clear daily budget shield"),
        }
        events.extend(self.update_friction());

        self.audit(AuditEventType::DayReset { day: today });
        self.persist_escalation();
        events.push(CoreEvent::DayRolledOver { day: today });
        events
    }

    // Shields

    pub fn emergency_unlock(&mut self, now: DateTime<Local>) -> Result<UnlockGrant, UnlockError> {
        let was_active = self.shields.is_active(ShieldDomainKind::DailyBudget);
        let expires_at = self.shields.perform_emergency_unlock(now)?;
        let unlocks_remaining = self.shields.unlocks_remaining(day_of(&now));

        let mut events = vec![CoreEvent::EmergencyUnlockGranted {
            expires_at,
            unlocks_remaining,
        }];
        if was_active {
            events.push(CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::DailyBudget,
                active: false,
            });
        }

        Ok(UnlockGrant {
            expires_at,
            unlocks_remaining,
            events,
        })
    }

    pub fn start_focus_session(
        &mut self,
        minutes: u32,
        now: DateTime<Local>,
    ) -> Result<(DateTime<Local>, Vec<CoreEvent>), ShieldError> {
        if minutes == 0 {
            return Err(ShieldError::EmptySession);
        }

        let was_active = self.shields.is_active(ShieldDomainKind::FocusSession);
        let ends_at = self
            .shields
            .start_focus(Duration::from_secs(u64::from(minutes) * 60), now)?;
        info!(minutes, ends_at = %ends_at, "Focus session started");

        let events = if was_active {
            Vec::new()
        } else {
            vec![CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::FocusSession,
                active: true,
            }]
        };
        Ok((ends_at, events))
    }

    pub fn end_focus_session(&mut self) -> Result<Vec<CoreEvent>, HostError> {
        Ok(if self.shields.end_focus()? {
            vec![CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::FocusSession,
                active: false,
            }]
        } else {
            Vec::new()
        })
    }

    pub fn network_changed(&mut self, network: Option<&str>) -> Vec<CoreEvent> {
        match self.shields.on_network(network) {
            Ok(Some(active)) => vec![CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::WifiGate,
                active,
            }],
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to update Wi-Fi gate");
                Vec::new()
            }
        }
    }

    // Reminders

    fn send_reminder(&mut self, message: &str, now: DateTime<Local>) -> Option<CoreEvent> {
        let today = day_of(&now);
        if self.reminders.remaining(today) == 0 {
            debug!("Reminder suppressed, daily cap reached");
            self.audit(AuditEventType::ReminderSuppressed);
            return None;
        }

        if let Err(e) = self.notifier.notify(message) {
            warn!(error = %e, "Failed to deliver reminder");
            return None;
        }

        self.reminders.try_consume(today);
        let used = self.reminders.used(today);
        let remaining_today = self.reminders.remaining(today);
        let _ = self
            .store
            .set_shared(REMINDERS_USED_KEY, &encode_day_count(today, used));
        self.audit(AuditEventType::ReminderSent {
            remaining: remaining_today,
        });

        Some(CoreEvent::ReminderSent {
            message: message.to_string(),
            remaining_today,
        })
    }

    /// Send a reminder if today's cap allows. Returns the event when sent.
    pub fn request_reminder(&mut self, message: &str, now: DateTime<Local>) -> Option<CoreEvent> {
        self.send_reminder(message, now)
    }

    pub fn reminders_remaining(&self, now: DateTime<Local>) -> u32 {
        self.reminders.remaining(day_of(&now))
    }

    // Contacts

    pub fn add_contact(&mut self, contact: &Contact) -> tether_util::Result<()> {
        self.store.upsert_contact(contact)?;
        info!(contact = %contact.identifier, "Contact saved");
        Ok(())
    }

    // State

    pub fn get_state(&self, now: DateTime<Local>) -> EngineStateSnapshot {
        let state = self.escalation.state();
        EngineStateSnapshot {
            api_version: API_VERSION,
            day: self.escalation.day(),
            minutes_used_today: self.monitor.minutes_used(),
            current_level: state.current_level,
            fired_levels: state
                .fired_levels
                .iter()
                .filter_map(|&i| u8::try_from(i + 1).ok())
                .collect(),
            night_mode_active: self.escalation.is_night(&now),
            open_challenges: self.challenges.values().cloned().collect(),
            domains: self.shields.statuses(),
            emergency_unlock: self.shields.unlock_status(now),
            reminders_remaining: self.reminders_remaining(now),
        }
    }

    pub fn health(&self) -> HealthStatus {
        let store_ok = self.store.is_healthy();
        let shield_backend_ok = self.shield_backend.is_healthy();
        HealthStatus {
            live: true,
            ready: store_ok && shield_backend_ok,
            store_ok,
            shield_backend_ok,
        }
    }
}

fn kind_label(kind: &ChallengeKind) -> &'static str {
    match kind {
        ChallengeKind::Text => "text",
        ChallengeKind::Call => "call",
        ChallengeKind::Grounding { .. } => "grounding",
    }
}

fn outcome_label(outcome: &VerificationOutcome) -> &'static str {
    match outcome {
        VerificationOutcome::Verified { .. } => "verified",
        VerificationOutcome::PartiallyVerified { .. } => "partially_verified",
        VerificationOutcome::Failed { .. } => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tether_api::{ConnectionLogEntry, ConnectionType};
    use tether_host_api::{MockDeepLinker, MockNotifier, MockShieldBackend};
    use tether_store::SqliteStore;
    use tether_util::{AppToken, NightWindow};

    struct Harness {
        engine: CoreEngine,
        store: Arc<SqliteStore>,
        backend: Arc<MockShieldBackend>,
        linker: Arc<MockDeepLinker>,
        notifier: Arc<MockNotifier>,
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    fn test_policy() -> Policy {
        let mut policy = Policy::default();
        policy.escalation.thresholds = vec![5, 15, 30, 45, 60];
        policy.escalation.night = NightWindow::disabled();
        policy.escalation.monitored_apps = [AppToken::new("feed")].into_iter().collect();
        policy.shields.friction.enabled = true;
        policy.shields.friction.apps = policy.escalation.monitored_apps.clone();
        policy.contacts = vec![Contact::new("ana", "Ana").with_phone("+15550100")];
        policy
    }

    fn harness_with(policy: Policy, store: Arc<SqliteStore>) -> Harness {
        let backend = Arc::new(MockShieldBackend::new());
        let linker = Arc::new(MockDeepLinker::new());
        let notifier = Arc::new(MockNotifier::new());
        let engine = CoreEngine::new(
            policy,
            store.clone(),
            backend.clone(),
            linker.clone(),
            notifier.clone(),
            at(9, 0),
        )
        .with_rng(StdRng::seed_from_u64(7));
        Harness {
            engine,
            store,
            backend,
            linker,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with(test_policy(), Arc::new(SqliteStore::in_memory().unwrap()))
    }

    fn issued(events: &[CoreEvent]) -> Option<Challenge> {
        events.iter().find_map(|e| match e {
            CoreEvent::ChallengeIssued(c) => Some(c.clone()),
            _ => None,
        })
    }

    fn reached(events: &[CoreEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                CoreEvent::LevelReached { level, .. } => Some(*level),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn thresholds_fire_once() {
        let mut h = harness();

        assert!(reached(&h.engine.record_usage(4, at(9, 4))).is_empty());
        assert_eq!(reached(&h.engine.record_usage(5, at(9, 5))), vec![1]);
        assert!(reached(&h.engine.record_usage(6, at(9, 6))).is_empty());
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[test]
    fn jump_fires_highest_level_only() {
        let mut h = harness();
        let events = h.engine.record_usage(31, at(9, 31));

        assert_eq!(reached(&events), vec![3]);
        let state = h.engine.get_state(at(9, 31));
        assert_eq!(state.fired_levels, vec![1, 2, 3]);
        assert_eq!(state.current_level, 3);
        // Level 3 issues a grounding challenge
        let challenge = issued(&events).unwrap();
        assert!(matches!(challenge.kind, ChallengeKind::Grounding { .. }));
    }

    #[test]
    fn text_level_picks_contact_and_applies_friction() {
        let mut h = harness();
        h.engine.record_usage(5, at(9, 5));
        let events = h.engine.record_usage(15, at(9, 15));

        let challenge = issued(&events).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::Text);
        assert_eq!(challenge.contact_name.as_deref(), Some("Ana"));
        assert!(h.engine.shields().is_active(ShieldDomainKind::Friction));
        assert!(h.backend.is_blocked(&AppToken::new("feed")));
    }

    #[test]
    fn prosocial_disabled_falls_back() {
        let mut policy = test_policy();
        policy.escalation.prosocial_enabled = false;
        let mut h = harness_with(policy, Arc::new(SqliteStore::in_memory().unwrap()));

        h.engine.record_usage(5, at(9, 5));
        let events = h.engine.record_usage(15, at(9, 15));
        assert!(issued(&events).is_none());
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::LevelReached {
                intervention: Intervention::BreathingExercise,
                prosocial: false,
                ..
            }
        )));
    }

    #[test]
    fn call_challenge_full_flow() {
        let mut h = harness();
        let events = h.engine.record_usage(45, at(9, 45));
        let challenge = issued(&events).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::Call);

        h.engine.begin_challenge(&challenge.id, at(9, 46)).unwrap();
        assert_eq!(
            h.linker.opened(),
            vec![(ChallengeKind::Call, Some("+15550100".to_string()))]
        );

        let t0 = at(9, 46);
        h.engine
            .on_telephony(TelephonySignal::Dialing { at: t0 }, t0);
        h.engine.on_telephony(
            TelephonySignal::Connected {
                at: t0 + chrono::Duration::seconds(5),
            },
            t0,
        );
        let events = h.engine.on_telephony(
            TelephonySignal::Disconnected {
                at: t0 + chrono::Duration::seconds(185),
            },
            t0 + chrono::Duration::seconds(185),
        );

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ChallengeResolved {
                outcome: VerificationOutcome::Verified { xp: 25, .. },
                method: VerificationMethod::CallObserver,
                ..
            }
        )));
        let stored = h.store.get_challenge(&challenge.id).unwrap().unwrap();
        assert!(stored.was_verified);
        assert_eq!(stored.xp_earned, 25);
        assert_eq!(h.store.connections_since(at(0, 0)).unwrap().len(), 1);
        // Friction lifts once nothing is open
        assert!(!h.engine.shields().is_active(ShieldDomainKind::Friction));
    }

    #[test]
    fn short_call_keeps_challenge_open() {
        let mut h = harness();
        let events = h.engine.record_usage(45, at(9, 45));
        let challenge = issued(&events).unwrap();
        h.engine.begin_challenge(&challenge.id, at(9, 46)).unwrap();

        let t0 = at(9, 46);
        h.engine
            .on_telephony(TelephonySignal::Connected { at: t0 }, t0);
        let events = h.engine.on_telephony(
            TelephonySignal::Disconnected {
                at: t0 + chrono::Duration::seconds(5),
            },
            t0,
        );

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ChallengeResolved {
                outcome: VerificationOutcome::Failed { .. },
                ..
            }
        )));
        assert_eq!(h.engine.open_challenges().count(), 1);
        assert!(h.store.connections_since(at(0, 0)).unwrap().is_empty());
        // Retrying is allowed
        assert!(h.engine.begin_challenge(&challenge.id, at(9, 50)).is_ok());
    }

    #[test]
    fn call_watch_times_out() {
        let mut h = harness();
        let challenge = issued(&h.engine.record_usage(45, at(9, 45))).unwrap();
        h.engine.begin_challenge(&challenge.id, at(9, 46)).unwrap();

        assert!(h.engine.tick(at(9, 47)).is_empty());
        let events = h.engine.tick(at(9, 48));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ChallengeResolved { outcome, .. } if outcome.message() == "No call detected"
        )));
    }

    #[test]
    fn skip_then_stale_signal_is_ignored() {
        let mut h = harness();
        let challenge = issued(&h.engine.record_usage(45, at(9, 45))).unwrap();
        h.engine.begin_challenge(&challenge.id, at(9, 46)).unwrap();

        let events = h.engine.skip_challenge(&challenge.id, at(9, 46)).unwrap();
        assert!(matches!(events[0], CoreEvent::ChallengeSkipped { .. }));

        let t0 = at(9, 47);
        assert!(
            h.engine
                .on_telephony(TelephonySignal::Connected { at: t0 }, t0)
                .is_empty()
        );
        assert!(matches!(
            h.engine.skip_challenge(&challenge.id, t0),
            Err(TetherError::ChallengeResolved(_))
        ));
        assert!(matches!(
            h.engine.begin_challenge(&ChallengeId::new(), t0),
            Err(TetherError::ChallengeNotFound(_))
        ));
    }

    #[test]
    fn stale_photo_verdict_dropped() {
        let mut h = harness();
        let challenge = issued(&h.engine.record_usage(30, at(9, 30))).unwrap();
        let request = h.engine.photo_request(&challenge.id).unwrap();
        assert_eq!(request.reward_xp, 10);

        h.engine.skip_challenge(&challenge.id, at(9, 31)).unwrap();
        let events = h.engine.apply_photo_verdict(
            &challenge.id,
            VerificationOutcome::verified(10, "ok"),
            at(9, 32),
        );
        assert!(events.is_empty());
        assert!(h.store.get_challenge(&challenge.id).unwrap().unwrap().was_skipped);
    }

    #[test]
    fn messaging_confirmed_through_shared_store() {
        let mut h = harness();
        h.engine.record_usage(5, at(9, 5));
        let challenge = issued(&h.engine.record_usage(15, at(9, 15))).unwrap();
        h.engine.begin_challenge(&challenge.id, at(9, 16)).unwrap();

        let (status, _) = h.engine.poll_messaging(&challenge.id, at(9, 17));
        assert_eq!(status, MessagingStatus::Watching);

        h.store
            .set_shared(&messaging_key(&challenge.id), MESSAGING_REACHED)
            .unwrap();
        let (status, events) = h.engine.poll_messaging(&challenge.id, at(9, 18));
        assert_eq!(status, MessagingStatus::Verified);
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ChallengeResolved {
                method: VerificationMethod::CommunicationCategory,
                ..
            }
        )));
    }

    #[test]
    fn messaging_window_closes_unconfirmed() {
        let mut h = harness();
        h.engine.record_usage(5, at(9, 5));
        let challenge = issued(&h.engine.record_usage(15, at(9, 15))).unwrap();
        h.engine.begin_challenge(&challenge.id, at(9, 16)).unwrap();

        h.engine.tick(at(9, 40));
        let (status, events) = h.engine.poll_messaging(&challenge.id, at(9, 40));
        assert_eq!(status, MessagingStatus::Unconfirmed);
        assert!(events.is_empty());
        assert_eq!(h.engine.open_challenges().count(), 1);
    }

    #[test]
    fn auto_verify_after_enough_connections() {
        let mut h = harness();
        for minute in 0..3 {
            h.store
                .append_connection(&ConnectionLogEntry {
                    contact_identifier: None,
                    contact_name: None,
                    timestamp: at(8, minute),
                    duration_seconds: 60,
                    connection_type: ConnectionType::Call,
                })
                .unwrap();
        }

        h.engine.record_usage(5, at(9, 5));
        let events = h.engine.record_usage(15, at(9, 15));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ChallengeResolved {
                method: VerificationMethod::AutoVerified,
                ..
            }
        )));
        assert_eq!(h.engine.open_challenges().count(), 0);
    }

    #[test]
    fn hard_friction_holds_until_reset() {
        let mut h = harness();
        let events = h.engine.record_usage(60, at(10, 0));
        assert_eq!(reached(&events), vec![5]);
        assert!(h.engine.hard_friction());
        assert!(h.engine.shields().is_active(ShieldDomainKind::Friction));

        let tomorrow = at(10, 0) + chrono::Duration::days(1);
        let events = h.engine.tick(tomorrow);
        assert!(events.iter().any(|e| matches!(e, CoreEvent::DayRolledOver { .. })));
        assert!(!h.engine.hard_friction());
        assert_eq!(h.engine.minutes_used(), 0);
        assert!(!h.engine.shields().is_active(ShieldDomainKind::Friction));
    }

    #[test]
    fn reset_is_idempotent_per_day() {
        let mut h = harness();
        h.engine.record_usage(20, at(9, 20));

        assert!(!h.engine.reset_for_new_day(at(9, 30)).is_empty());
        assert!(h.engine.reset_for_new_day(at(9, 31)).is_empty());
        assert_eq!(h.engine.current_level(), 0);
    }

    #[test]
    fn reminders_capped_per_day() {
        let mut policy = test_policy();
        policy.notifications.max_reminders_per_day = 2;
        let mut h = harness_with(policy, Arc::new(SqliteStore::in_memory().unwrap()));

        assert!(h.engine.request_reminder("one", at(9, 0)).is_some());
        assert!(h.engine.request_reminder("two", at(9, 1)).is_some());
        assert!(h.engine.request_reminder("three", at(9, 2)).is_none());
        assert_eq!(h.notifier.sent(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(h.engine.reminders_remaining(at(9, 3)), 0);
    }

    #[test]
    fn restore_same_day_keeps_fired_levels() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let challenge_id = {
            let mut h = harness_with(test_policy(), store.clone());
            issued(&h.engine.record_usage(30, at(9, 30))).unwrap().id
        };

        let mut h = harness_with(test_policy(), store);
        h.engine.restore(at(9, 40));

        assert_eq!(h.engine.current_level(), 3);
        assert!(reached(&h.engine.record_usage(31, at(9, 41))).is_empty());
        assert!(h.engine.photo_request(&challenge_id).is_ok());
        assert!(h.engine.shields().is_active(ShieldDomainKind::Friction));
    }

    #[test]
    fn restore_from_earlier_day_resets() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        {
            let mut h = harness_with(test_policy(), store.clone());
            h.engine.record_usage(20, at(9, 20));
        }

        let mut h = harness_with(test_policy(), store);
        let events = h.engine.restore(at(9, 0) + chrono::Duration::days(1));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::DayRolledOver { .. })));
        assert_eq!(h.engine.current_level(), 0);
    }

    #[test]
    fn messaging_confirmation_after_restart_resolves() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let challenge_id = {
            let mut h = harness_with(test_policy(), store.clone());
            h.engine.record_usage(5, at(9, 5));
            let challenge = issued(&h.engine.record_usage(15, at(9, 15))).unwrap();
            h.engine.begin_challenge(&challenge.id, at(9, 16)).unwrap();
            challenge.id
        };

        let mut h = harness_with(test_policy(), store);
        h.engine.restore(at(9, 20));
        let (status, _) = h.engine.poll_messaging(&challenge_id, at(9, 20));
        assert_eq!(status, MessagingStatus::Watching);

        h.store
            .set_shared(&messaging_key(&challenge_id), MESSAGING_REACHED)
            .unwrap();
        let (status, events) = h.engine.poll_messaging(&challenge_id, at(9, 21));

        assert_eq!(status, MessagingStatus::Verified);
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ChallengeResolved { challenge_id: id, .. } if *id == challenge_id
        )));
        assert_eq!(h.engine.open_challenges().count(), 0);
        assert!(!h.engine.shields().is_active(ShieldDomainKind::Friction));
        assert!(h.store.get_shared(&messaging_key(&challenge_id)).unwrap().is_none());

        // The closed watch is gone after the next daily reset
        h.engine.reset_for_new_day(at(9, 0) + chrono::Duration::days(1));
        let (status, _) = h
            .engine
            .poll_messaging(&challenge_id, at(9, 1) + chrono::Duration::days(1));
        assert_eq!(status, MessagingStatus::NotWatching);
    }

    #[test]
    fn confirmation_without_watch_is_kept() {
        let mut h = harness();
        h.engine.record_usage(5, at(9, 5));
        let challenge = issued(&h.engine.record_usage(15, at(9, 15))).unwrap();
        let key = messaging_key(&challenge.id);
        h.store.set_shared(&key, MESSAGING_REACHED).unwrap();

        let (status, events) = h.engine.poll_messaging(&challenge.id, at(9, 16));
        assert_eq!(status, MessagingStatus::NotWatching);
        assert!(events.is_empty());
        assert_eq!(h.store.get_shared(&key).unwrap().as_deref(), Some(MESSAGING_REACHED));
        assert_eq!(h.engine.open_challenges().count(), 1);
    }

    #[test]
    fn call_watch_survives_restart() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let challenge_id = {
            let mut h = harness_with(test_policy(), store.clone());
            let challenge = issued(&h.engine.record_usage(45, at(9, 45))).unwrap();
            assert_eq!(challenge.kind, ChallengeKind::Call);
            h.engine.begin_challenge(&challenge.id, at(9, 50)).unwrap();
            challenge.id
        };

        let mut h = harness_with(test_policy(), store);
        h.engine.restore(at(9, 51));
        assert!(h
            .engine
            .on_telephony(TelephonySignal::Connected { at: at(9, 51) }, at(9, 51))
            .is_empty());
        let events = h
            .engine
            .on_telephony(TelephonySignal::Disconnected { at: at(9, 55) }, at(9, 55));

        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ChallengeResolved {
                challenge_id: id,
                method: VerificationMethod::CallObserver,
                ..
            } if *id == challenge_id
        )));
        assert_eq!(h.engine.open_challenges().count(), 0);
    }

    #[test]
    fn focus_session_round_trip() {
        let mut h = harness();
        let (ends_at, events) = h.engine.start_focus_session(25, at(9, 0)).unwrap();
        assert_eq!(ends_at, at(9, 25));
        assert_eq!(events.len(), 1);

        let events = h.engine.tick(at(9, 25));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::ShieldChanged {
                domain: ShieldDomainKind::FocusSession,
                active: false
            }
        )));
    }

    #[test]
    fn unlock_expiry_event_from_tick() {
        let mut policy = test_policy();
        policy.shields.daily_budget.domain.enabled = true;
        policy.shields.daily_budget.domain.apps = policy.escalation.monitored_apps.clone();
        policy.shields.daily_budget.budget_minutes = Some(30);
        let mut h = harness_with(policy, Arc::new(SqliteStore::in_memory().unwrap()));

        h.engine.record_usage(30, at(10, 0));
        let grant = h.engine.emergency_unlock(at(10, 0)).unwrap();
        assert_eq!(grant.unlocks_remaining, 1);

        assert!(
            !h.engine
                .tick(at(10, 29))
                .iter()
                .any(|e| matches!(e, CoreEvent::EmergencyUnlockExpired))
        );
        let events = h.engine.tick(at(10, 30));
        assert!(events.iter().any(|e| matches!(e, CoreEvent::EmergencyUnlockExpired)));
        assert!(h.engine.shields().budget_locked(at(10, 30)));
    }

    #[test]
    fn health_reports_collaborators() {
        let h = harness();
        let health = h.engine.health();
        assert!(health.live);
        assert!(health.ready);
    }
}

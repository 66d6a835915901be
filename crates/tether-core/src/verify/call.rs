//! Call-based verification
//!
//! Models the telephone call lifecycle as an explicit state machine:
//! `Idle -> Dialing -> Connected -> Ended`. Talk time is measured from the
//! connected transition.

use chrono::{DateTime, Local};
use std::time::Duration;
use tether_api::{
    Challenge, ConnectionLogEntry, ConnectionType, TelephonySignal, VerificationMethod,
    VerificationOutcome,
};
use tether_config::{RewardTable, VerificationPolicy};
use tether_util::{elapsed_between, ChallengeId};
use tracing::{debug, info};

use super::{StrategyOutcome, WatchContact, WatchStrategy};

/// Call lifecycle for one pending challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Watching, no call seen yet
    Idle,
    Dialing {
        started_at: DateTime<Local>,
    },
    Connected {
        started_at: DateTime<Local>,
        connected_at: DateTime<Local>,
    },
    Ended {
        connected: bool,
        duration: Duration,
    },
}

/// Bounds used to classify a finished call
#[derive(Debug, Clone, Copy)]
pub struct CallRules {
    pub min: Duration,
    pub long: Duration,
    pub watch: Duration,
    pub max: Duration,
    pub xp_attempted: u32,
    pub xp_completed: u32,
    pub xp_long: u32,
}

impl CallRules {
    pub fn from_policy(verification: &VerificationPolicy, rewards: &RewardTable) -> Self {
        Self {
            min: verification.call_min,
            long: verification.long_call,
            watch: verification.call_watch,
            max: verification.call_max,
            xp_attempted: rewards.call_attempted,
            xp_completed: rewards.call_completed,
            xp_long: rewards.long_call_5min,
        }
    }
}

/// Classify an ended call
pub fn classify_call(connected: bool, duration: Duration, rules: &CallRules) -> VerificationOutcome {
    if !connected {
        return VerificationOutcome::partial(
            rules.xp_attempted,
            "They didn't pick up, but reaching out still counts.",
        );
    }
    if duration <= rules.min {
        return VerificationOutcome::failed("That call was too short to count. Try again?");
    }
    if duration >= rules.long {
        VerificationOutcome::verified(rules.xp_long, "A real conversation. Great call!")
    } else {
        VerificationOutcome::verified(rules.xp_completed, "Call completed. Nice work!")
    }
}

#[derive(Debug)]
struct CallWatch {
    challenge_id: ChallengeId,
    contact: WatchContact,
    watch_started: DateTime<Local>,
    phase: CallPhase,
}

/// Observes telephony signals for at most one pending call challenge
#[derive(Debug)]
pub struct CallVerifier {
    rules: CallRules,
    pending: Option<CallWatch>,
}

impl CallVerifier {
    pub fn new(rules: CallRules) -> Self {
        Self {
            rules,
            pending: None,
        }
    }

    pub fn phase(&self) -> Option<CallPhase> {
        self.pending.as_ref().map(|w| w.phase)
    }

    pub fn pending_challenge(&self) -> Option<ChallengeId> {
        self.pending.as_ref().map(|w| w.challenge_id)
    }

    /// Rebuild the watch of a call challenge begun before a restart. A watch
    /// whose no-call window already ran out is not resumed; the challenge
    /// stays open for another attempt.
    pub fn resume(
        &mut self,
        challenge: &Challenge,
        started_at: DateTime<Local>,
        now: DateTime<Local>,
    ) -> bool {
        if elapsed_between(started_at, now) >= self.rules.watch {
            return false;
        }
        debug!(challenge_id = %challenge.id, "Call watch resumed");
        self.pending = Some(CallWatch {
            challenge_id: challenge.id,
            contact: WatchContact::of(challenge),
            watch_started: started_at,
            phase: CallPhase::Idle,
        });
        true
    }

    /// Feed a telephony signal. Signals with no pending watch are stale and dropped.
    pub fn on_signal(&mut self, signal: TelephonySignal) -> Option<StrategyOutcome> {
        let Some(watch) = self.pending.as_mut() else {
            debug!(?signal, "Telephony signal with no pending call watch");
            return None;
        };

        let next = match (watch.phase, signal) {
            (CallPhase::Idle, TelephonySignal::Dialing { at }) => {
                CallPhase::Dialing { started_at: at }
            }
            (CallPhase::Idle, TelephonySignal::Connected { at }) => CallPhase::Connected {
                started_at: at,
                connected_at: at,
            },
            (CallPhase::Dialing { started_at }, TelephonySignal::Connected { at }) => {
                CallPhase::Connected {
                    started_at,
                    connected_at: at,
                }
            }
            (CallPhase::Dialing { .. }, TelephonySignal::Disconnected { .. }) => CallPhase::Ended {
                connected: false,
                duration: Duration::ZERO,
            },
            (CallPhase::Connected { connected_at, .. }, TelephonySignal::Disconnected { at }) => {
                CallPhase::Ended {
                    connected: true,
                    duration: elapsed_between(connected_at, at).min(self.rules.max),
                }
            }
            (phase, signal) => {
                debug!(?phase, ?signal, "Ignoring out-of-order telephony signal");
                phase
            }
        };
        watch.phase = next;

        match next {
            CallPhase::Ended {
                connected,
                duration,
            } => self.finish(connected, duration, signal.at()),
            _ => None,
        }
    }

    fn finish(
        &mut self,
        connected: bool,
        duration: Duration,
        ended_at: DateTime<Local>,
    ) -> Option<StrategyOutcome> {
        let watch = self.pending.take()?;
        let outcome = classify_call(connected, duration, &self.rules);
        info!(
            challenge_id = %watch.challenge_id,
            connected,
            duration_secs = duration.as_secs(),
            ?outcome,
            "Call classified"
        );

        let connection_type = match (&outcome, connected) {
            (VerificationOutcome::Failed { .. }, _) => None,
            (_, true) => Some(ConnectionType::Call),
            (_, false) => Some(ConnectionType::CallAttempted),
        };
        let connection = connection_type.map(|connection_type| ConnectionLogEntry {
            contact_identifier: watch.contact.identifier.clone(),
            contact_name: watch.contact.name.clone(),
            timestamp: ended_at,
            duration_seconds: duration.as_secs(),
            connection_type,
        });

        Some(StrategyOutcome {
            challenge_id: watch.challenge_id,
            outcome,
            method: VerificationMethod::CallObserver,
            connection,
        })
    }
}

impl WatchStrategy for CallVerifier {
    fn start(&mut self, challenge: &Challenge, now: DateTime<Local>) {
        if let Some(old) = &self.pending
            && old.challenge_id != challenge.id
        {
            debug!(
                superseded = %old.challenge_id,
                challenge_id = %challenge.id,
                "Call watch superseded"
            );
        }
        self.pending = Some(CallWatch {
            challenge_id: challenge.id,
            contact: WatchContact::of(challenge),
            watch_started: now,
            phase: CallPhase::Idle,
        });
    }

    fn cancel(&mut self, challenge_id: &ChallengeId) {
        if self.pending_challenge().as_ref() == Some(challenge_id) {
            self.pending = None;
        }
    }

    fn tick(&mut self, now: DateTime<Local>) -> Option<StrategyOutcome> {
        let (phase, watch_started) = self
            .pending
            .as_ref()
            .map(|w| (w.phase, w.watch_started))?;
        match phase {
            CallPhase::Idle if elapsed_between(watch_started, now) >= self.rules.watch => {
                let watch = self.pending.take()?;
                info!(challenge_id = %watch.challenge_id, "No call detected");
                Some(StrategyOutcome {
                    challenge_id: watch.challenge_id,
                    outcome: VerificationOutcome::failed("No call detected"),
                    method: VerificationMethod::CallObserver,
                    connection: None,
                })
            }
            // Ringing that never resolves counts as an unanswered attempt
            CallPhase::Dialing { started_at }
                if elapsed_between(started_at, now) >= self.rules.watch =>
            {
                self.finish(false, Duration::ZERO, now)
            }
            CallPhase::Connected { connected_at, .. }
                if elapsed_between(connected_at, now) >= self.rules.max =>
            {
                self.finish(true, self.rules.max, now)
            }
            _ => None,
        }
    }

    fn is_watching(&self, challenge_id: &ChallengeId) -> bool {
        self.pending_challenge().as_ref() == Some(challenge_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_api::ChallengeKind;
    use tether_api::Contact;

    fn rules() -> CallRules {
        CallRules::from_policy(
            &tether_config::Policy::default().verification,
            &RewardTable::default(),
        )
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn call_challenge(now: DateTime<Local>) -> Challenge {
        Challenge::new(ChallengeKind::Call, 4, now).with_contact(&Contact::new("c1", "Sam"))
    }

    #[test]
    fn classification_tiers() {
        let r = rules();
        assert_eq!(
            classify_call(true, Duration::from_secs(180), &r).xp(),
            r.xp_completed
        );
        assert_eq!(
            classify_call(true, Duration::from_secs(320), &r).xp(),
            r.xp_long
        );
        assert_eq!(
            classify_call(true, Duration::from_secs(300), &r).xp(),
            r.xp_long
        );
        assert!(matches!(
            classify_call(true, Duration::from_secs(5), &r),
            VerificationOutcome::Failed { .. }
        ));
        assert!(matches!(
            classify_call(true, Duration::from_secs(10), &r),
            VerificationOutcome::Failed { .. }
        ));
        assert!(matches!(
            classify_call(false, Duration::ZERO, &r),
            VerificationOutcome::PartiallyVerified { .. }
        ));
    }

    #[test]
    fn full_lifecycle_verifies() {
        let now = tether_util::now();
        let challenge = call_challenge(now);
        let mut verifier = CallVerifier::new(rules());
        verifier.start(&challenge, now);

        assert!(verifier
            .on_signal(TelephonySignal::Dialing { at: now + secs(5) })
            .is_none());
        assert!(verifier
            .on_signal(TelephonySignal::Connected { at: now + secs(15) })
            .is_none());
        let result = verifier
            .on_signal(TelephonySignal::Disconnected { at: now + secs(195) })
            .unwrap();

        assert_eq!(result.challenge_id, challenge.id);
        assert_eq!(result.outcome.xp(), rules().xp_completed);
        let connection = result.connection.unwrap();
        assert_eq!(connection.duration_seconds, 180);
        assert_eq!(connection.connection_type, ConnectionType::Call);
        assert!(verifier.pending_challenge().is_none());
    }

    #[test]
    fn unanswered_call_is_partial() {
        let now = tether_util::now();
        let mut verifier = CallVerifier::new(rules());
        verifier.start(&call_challenge(now), now);

        verifier.on_signal(TelephonySignal::Dialing { at: now });
        let result = verifier
            .on_signal(TelephonySignal::Disconnected { at: now + secs(20) })
            .unwrap();

        assert!(matches!(
            result.outcome,
            VerificationOutcome::PartiallyVerified { .. }
        ));
        assert_eq!(
            result.connection.unwrap().connection_type,
            ConnectionType::CallAttempted
        );
    }

    #[test]
    fn short_call_fails_without_log() {
        let now = tether_util::now();
        let mut verifier = CallVerifier::new(rules());
        verifier.start(&call_challenge(now), now);

        verifier.on_signal(TelephonySignal::Connected { at: now });
        let result = verifier
            .on_signal(TelephonySignal::Disconnected { at: now + secs(5) })
            .unwrap();

        assert!(!result.outcome.counts());
        assert!(result.connection.is_none());
    }

    #[test]
    fn no_call_times_out() {
        let now = tether_util::now();
        let mut verifier = CallVerifier::new(rules());
        verifier.start(&call_challenge(now), now);

        assert!(verifier.tick(now + secs(119)).is_none());
        let result = verifier.tick(now + secs(120)).unwrap();
        assert_eq!(result.outcome, VerificationOutcome::failed("No call detected"));

        // Exactly one outcome
        assert!(verifier.tick(now + secs(200)).is_none());
    }

    #[test]
    fn new_watch_supersedes_old() {
        let now = tether_util::now();
        let first = call_challenge(now);
        let second = call_challenge(now);
        let mut verifier = CallVerifier::new(rules());

        verifier.start(&first, now);
        verifier.on_signal(TelephonySignal::Connected { at: now });
        verifier.start(&second, now + secs(30));

        assert!(!verifier.is_watching(&first.id));
        // The disconnect belongs to the stale call and lands on an idle watch
        assert!(verifier
            .on_signal(TelephonySignal::Disconnected { at: now + secs(60) })
            .is_none());
        assert!(verifier.is_watching(&second.id));
    }

    #[test]
    fn runaway_call_is_capped() {
        let now = tether_util::now();
        let mut verifier = CallVerifier::new(rules());
        verifier.start(&call_challenge(now), now);
        verifier.on_signal(TelephonySignal::Connected { at: now });

        let max = rules().max.as_secs() as i64;
        let result = verifier.tick(now + secs(max)).unwrap();
        assert_eq!(result.outcome.xp(), rules().xp_long);
        assert_eq!(result.connection.unwrap().duration_seconds, max as u64);
    }

    #[test]
    fn stray_signals_ignored() {
        let now = tether_util::now();
        let mut verifier = CallVerifier::new(rules());
        assert!(verifier
            .on_signal(TelephonySignal::Disconnected { at: now })
            .is_none());

        verifier.start(&call_challenge(now), now);
        assert!(verifier
            .on_signal(TelephonySignal::Disconnected { at: now })
            .is_none());
        assert_eq!(verifier.phase(), Some(CallPhase::Idle));
    }

    #[test]
    fn resume_honours_original_watch_window() {
        let now = tether_util::now();
        let challenge = call_challenge(now);
        let mut verifier = CallVerifier::new(rules());

        assert!(!verifier.resume(&challenge, now, now + secs(121)));
        assert!(verifier.pending_challenge().is_none());

        assert!(verifier.resume(&challenge, now, now + secs(30)));
        assert!(verifier.tick(now + secs(60)).is_none());
        let result = verifier.tick(now + secs(120)).unwrap();
        assert_eq!(result.outcome, VerificationOutcome::failed("No call detected"));
    }
}

//! Messaging-duration verification
//!
//! After a text challenge opens the messaging surface, cumulative foreground
//! time in the messaging category is compared against a threshold inside a
//! bounded window. A window that closes without confirmation leaves the
//! challenge unconfirmed, never failed.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;
use tether_api::{
    Challenge, ConnectionLogEntry, ConnectionType, MessagingStatus, VerificationMethod,
    VerificationOutcome,
};
use tether_util::{to_chrono, ChallengeId};
use tracing::{debug, info};

use super::{StrategyOutcome, WatchContact, WatchStrategy};

#[derive(Debug)]
struct MessagingWatch {
    contact: WatchContact,
    deadline: DateTime<Local>,
    foreground: Duration,
    status: MessagingStatus,
}

#[derive(Debug)]
pub struct MessagingVerifier {
    threshold: Duration,
    window: Duration,
    reward_xp: u32,
    watches: HashMap<ChallengeId, MessagingWatch>,
}

impl MessagingVerifier {
    pub fn new(threshold: Duration, window: Duration, reward_xp: u32) -> Self {
        Self {
            threshold,
            window,
            reward_xp,
            watches: HashMap::new(),
        }
    }

    /// Record cumulative messaging foreground seconds.
    ///
    /// Without an explicit challenge id the report goes to the single
    /// watch whose window is still open.
    pub fn on_foreground(
        &mut self,
        challenge_id: Option<ChallengeId>,
        cumulative: Duration,
        now: DateTime<Local>,
    ) -> Option<StrategyOutcome> {
        let id = match challenge_id {
            Some(id) => id,
            None => self
                .watches
                .iter()
                .find(|(_, w)| w.status == MessagingStatus::Watching)
                .map(|(id, _)| *id)?,
        };

        let Some(watch) = self.watches.get_mut(&id) else {
            debug!(challenge_id = %id, "Foreground report with no messaging watch");
            return None;
        };
        if watch.status != MessagingStatus::Watching || now > watch.deadline {
            debug!(challenge_id = %id, "Foreground report outside the watch window");
            return None;
        }

        watch.foreground = watch.foreground.max(cumulative);
        if watch.foreground >= self.threshold {
            info!(
                challenge_id = %id,
                seconds = watch.foreground.as_secs(),
                "Messaging threshold reached"
            );
            return self.verify(id, now);
        }
        None
    }

    /// Explicit confirmation written by the foreground monitor.
    /// Accepted even after the window closed.
    pub fn confirm(&mut self, id: &ChallengeId, now: DateTime<Local>) -> Option<StrategyOutcome> {
        match self.watches.get(id).map(|w| w.status) {
            Some(MessagingStatus::Watching) | Some(MessagingStatus::Unconfirmed) => {
                info!(challenge_id = %id, "Messaging confirmed");
                self.verify(*id, now)
            }
            _ => None,
        }
    }

    fn verify(&mut self, id: ChallengeId, now: DateTime<Local>) -> Option<StrategyOutcome> {
        let watch = self.watches.get_mut(&id)?;
        watch.status = MessagingStatus::Verified;

        Some(StrategyOutcome {
            challenge_id: id,
            outcome: VerificationOutcome::verified(self.reward_xp, "Message sent. Nice work!"),
            method: VerificationMethod::CommunicationCategory,
            connection: Some(ConnectionLogEntry {
                contact_identifier: watch.contact.identifier.clone(),
                contact_name: watch.contact.name.clone(),
                timestamp: now,
                duration_seconds: watch.foreground.as_secs(),
                connection_type: ConnectionType::Text,
            }),
        })
    }

    /// Rebuild the watch of a challenge begun before a restart. The window
    /// still runs from the original start; only one resumed watch may be
    /// open, the rest come back unconfirmed.
    pub fn resume(
        &mut self,
        challenge: &Challenge,
        started_at: DateTime<Local>,
        now: DateTime<Local>,
    ) {
        let deadline = started_at + to_chrono(self.window);
        let open_elsewhere = self
            .watches
            .values()
            .any(|w| w.status == MessagingStatus::Watching);
        let status = if now > deadline || open_elsewhere {
            MessagingStatus::Unconfirmed
        } else {
            MessagingStatus::Watching
        };

        debug!(challenge_id = %challenge.id, ?status, "Messaging watch resumed");
        self.watches.insert(
            challenge.id,
            MessagingWatch {
                contact: WatchContact::of(challenge),
                deadline,
                foreground: Duration::ZERO,
                status,
            },
        );
    }

    /// Forget closed watches whose challenge is no longer open.
    /// Returns how many were dropped.
    pub fn prune(&mut self, is_open: impl Fn(&ChallengeId) -> bool) -> usize {
        let before = self.watches.len();
        self.watches
            .retain(|id, w| w.status == MessagingStatus::Watching || is_open(id));
        before - self.watches.len()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Current status, closing the window if it has passed
    pub fn poll(&mut self, id: &ChallengeId, now: DateTime<Local>) -> MessagingStatus {
        match self.watches.get_mut(id) {
            Some(watch) => {
                if watch.status == MessagingStatus::Watching && now > watch.deadline {
                    watch.status = MessagingStatus::Unconfirmed;
                }
                watch.status
            }
            None => MessagingStatus::NotWatching,
        }
    }
}

impl WatchStrategy for MessagingVerifier {
    fn start(&mut self, challenge: &Challenge, now: DateTime<Local>) {
        // One open window at a time; an older unresolved one stays pollable
        for (id, watch) in self.watches.iter_mut() {
            if *id != challenge.id && watch.status == MessagingStatus::Watching {
                debug!(superseded = %id, challenge_id = %challenge.id, "Messaging watch superseded");
                watch.status = MessagingStatus::Unconfirmed;
            }
        }

        self.watches.insert(
            challenge.id,
            MessagingWatch {
                contact: WatchContact::of(challenge),
                deadline: now + to_chrono(self.window),
                foreground: Duration::ZERO,
                status: MessagingStatus::Watching,
            },
        );
    }

    fn cancel(&mut self, challenge_id: &ChallengeId) {
        self.watches.remove(challenge_id);
    }

    /// Windows only close here; no outcome is forced
    fn tick(&mut self, now: DateTime<Local>) -> Option<StrategyOutcome> {
        for (id, watch) in self.watches.iter_mut() {
            if watch.status == MessagingStatus::Watching && now > watch.deadline {
                info!(challenge_id = %id, "Messaging window closed without confirmation");
                watch.status = MessagingStatus::Unconfirmed;
            }
        }
        None
    }

    fn is_watching(&self, challenge_id: &ChallengeId) -> bool {
        self.watches
            .get(challenge_id)
            .is_some_and(|w| w.status == MessagingStatus::Watching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_api::{ChallengeKind, Contact};

    fn verifier() -> MessagingVerifier {
        MessagingVerifier::new(Duration::from_secs(30), Duration::from_secs(900), 10)
    }

    fn text_challenge(now: DateTime<Local>) -> Challenge {
        Challenge::new(ChallengeKind::Text, 2, now).with_contact(&Contact::new("c1", "Sam"))
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn threshold_verifies() {
        let now = tether_util::now();
        let challenge = text_challenge(now);
        let mut v = verifier();
        v.start(&challenge, now);

        assert!(v
            .on_foreground(Some(challenge.id), Duration::from_secs(12), now + secs(20))
            .is_none());
        let result = v
            .on_foreground(None, Duration::from_secs(31), now + secs(60))
            .unwrap();

        assert_eq!(result.outcome, VerificationOutcome::verified(10, "Message sent. Nice work!"));
        assert_eq!(result.method, VerificationMethod::CommunicationCategory);
        assert_eq!(
            result.connection.unwrap().connection_type,
            ConnectionType::Text
        );
        assert_eq!(v.poll(&challenge.id, now + secs(61)), MessagingStatus::Verified);

        // No second outcome
        assert!(v
            .on_foreground(Some(challenge.id), Duration::from_secs(90), now + secs(70))
            .is_none());
    }

    #[test]
    fn window_close_is_unconfirmed_not_failed() {
        let now = tether_util::now();
        let challenge = text_challenge(now);
        let mut v = verifier();
        v.start(&challenge, now);

        assert!(v.tick(now + secs(901)).is_none());
        assert_eq!(v.poll(&challenge.id, now + secs(901)), MessagingStatus::Unconfirmed);

        // Late foreground time does not count
        assert!(v
            .on_foreground(Some(challenge.id), Duration::from_secs(60), now + secs(950))
            .is_none());

        // Explicit confirmation still does
        assert!(v.confirm(&challenge.id, now + secs(960)).is_some());
    }

    #[test]
    fn poll_closes_window_lazily() {
        let now = tether_util::now();
        let challenge = text_challenge(now);
        let mut v = verifier();
        v.start(&challenge, now);

        assert_eq!(v.poll(&challenge.id, now + secs(10)), MessagingStatus::Watching);
        assert_eq!(v.poll(&challenge.id, now + secs(1000)), MessagingStatus::Unconfirmed);
        assert_eq!(
            v.poll(&ChallengeId::new(), now),
            MessagingStatus::NotWatching
        );
    }

    #[test]
    fn resumed_watch_keeps_original_window() {
        let now = tether_util::now();
        let older = text_challenge(now);
        let newer = text_challenge(now);
        let mut v = verifier();

        v.resume(&newer, now, now + secs(60));
        v.resume(&older, now - secs(120), now + secs(60));
        assert_eq!(v.poll(&newer.id, now + secs(60)), MessagingStatus::Watching);
        assert_eq!(v.poll(&older.id, now + secs(60)), MessagingStatus::Unconfirmed);

        // Confirmation works for both
        assert!(v.confirm(&older.id, now + secs(61)).is_some());
        assert!(v.on_foreground(None, Duration::from_secs(45), now + secs(62)).is_some());

        let mut late = verifier();
        late.resume(&newer, now, now + secs(901));
        assert_eq!(late.poll(&newer.id, now + secs(901)), MessagingStatus::Unconfirmed);
    }

    #[test]
    fn prune_keeps_open_windows_and_open_challenges() {
        let now = tether_util::now();
        let verified = text_challenge(now);
        let lapsed = text_challenge(now);
        let watching = text_challenge(now);
        let mut v = verifier();

        v.start(&verified, now);
        v.confirm(&verified.id, now).unwrap();
        v.start(&lapsed, now);
        v.tick(now + secs(901));
        v.start(&watching, now + secs(902));

        // Only the lapsed challenge is still open
        assert_eq!(v.prune(|id| *id == lapsed.id), 1);
        assert_eq!(v.watch_count(), 2);
        assert_eq!(v.poll(&verified.id, now + secs(903)), MessagingStatus::NotWatching);
        assert_eq!(v.poll(&lapsed.id, now + secs(903)), MessagingStatus::Unconfirmed);
        assert!(v.is_watching(&watching.id));
    }

    #[test]
    fn cancel_drops_watch() {
        let now = tether_util::now();
        let challenge = text_challenge(now);
        let mut v = verifier();
        v.start(&challenge, now);
        v.cancel(&challenge.id);

        assert!(!v.is_watching(&challenge.id));
        assert!(v.confirm(&challenge.id, now).is_none());
    }
}

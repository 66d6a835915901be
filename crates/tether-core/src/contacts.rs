//! Contact selection for prosocial challenges

use chrono::{DateTime, Local};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use tether_api::{ConnectionLogEntry, Contact};
use tether_util::{start_of_day, ContactId};

/// Candidates not contacted for this many days are preferred
pub const STALE_CONTACT_DAYS: i64 = 7;

/// Pick a contact, preferring people not reached recently.
///
/// Priority: (1) no log entry in the last 7 days, (2) no log entry today,
/// (3) anyone. Ties are broken uniformly at random.
pub fn select_contact<'a, R: Rng + ?Sized>(
    candidates: &'a [Contact],
    logs: &[ConnectionLogEntry],
    now: DateTime<Local>,
    rng: &mut R,
) -> Option<&'a Contact> {
    let mut last_seen: HashMap<&ContactId, DateTime<Local>> = HashMap::new();
    for entry in logs {
        if let Some(id) = &entry.contact_identifier {
            let seen = last_seen.entry(id).or_insert(entry.timestamp);
            if entry.timestamp > *seen {
                *seen = entry.timestamp;
            }
        }
    }

    let week_ago = now - chrono::Duration::days(STALE_CONTACT_DAYS);
    let today = start_of_day(&now);

    let not_this_week: Vec<&Contact> = candidates
        .iter()
        .filter(|c| last_seen.get(&c.identifier).is_none_or(|t| *t < week_ago))
        .collect();
    if let Some(contact) = not_this_week.choose(rng).copied() {
        return Some(contact);
    }

    let not_today: Vec<&Contact> = candidates
        .iter()
        .filter(|c| last_seen.get(&c.identifier).is_none_or(|t| *t < today))
        .collect();
    if let Some(contact) = not_today.choose(rng).copied() {
        return Some(contact);
    }

    candidates.choose(rng)
}

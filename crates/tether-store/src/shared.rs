//! Shared key-value schema
//!
//! These keys may be written by a background monitor in another process and
//! read by the engine at any time (and the other way around). Every key is
//! last-writer-wins.
//!
//! | key | value |
//! |-----|-------|
//! | `shield.<domain>.active` | `"true"` / `"false"` |
//! | `shield.<domain>.apps` | JSON array of app tokens |
//! | `shield.daily_budget.unlock_expires_at` | RFC 3339, absent when locked |
//! | `shield.daily_budget.unlocks_used` | `"<YYYY-MM-DD>:<n>"` |
//! | `shield.daily_budget.over_budget_on` | `"<YYYY-MM-DD>"` the budget was reached |
//! | `shield.focus_session.ends_at` | RFC 3339, absent when no session |
//! | `verify.messaging.<challenge-id>` | `"reached"` |
//! | `notify.reminders_used` | `"<YYYY-MM-DD>:<n>"` |

use chrono::{DateTime, Local, NaiveDate};
use std::collections::BTreeSet;
use tether_api::ShieldDomainKind;
use tether_util::{AppToken, ChallengeId};

use crate::{Store, StoreResult};

pub const UNLOCK_EXPIRES_AT_KEY: &str = "shield.daily_budget.unlock_expires_at";
pub const UNLOCKS_USED_KEY: &str = "shield.daily_budget.unlocks_used";
pub const OVER_BUDGET_ON_KEY: &str = "shield.daily_budget.over_budget_on";
pub const FOCUS_ENDS_AT_KEY: &str = "shield.focus_session.ends_at";
pub const REMINDERS_USED_KEY: &str = "notify.reminders_used";
pub const MESSAGING_REACHED: &str = "reached";

pub fn shield_active_key(domain: ShieldDomainKind) -> String {
    format!("shield.{}.active", domain.as_str())
}

pub fn shield_apps_key(domain: ShieldDomainKind) -> String {
    format!("shield.{}.apps", domain.as_str())
}

pub fn messaging_key(id: &ChallengeId) -> String {
    format!("verify.messaging.{}", id)
}

/// Encode a per-day counter as `YYYY-MM-DD:n`
pub fn encode_day_count(day: NaiveDate, count: u32) -> String {
    format!("{}:{}", day.format("%Y-%m-%d"), count)
}

/// Decode a `YYYY-MM-DD:n` counter
pub fn decode_day_count(value: &str) -> Option<(NaiveDate, u32)> {
    let (day, count) = value.rsplit_once(':')?;
    let day = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    let count = count.parse().ok()?;
    Some((day, count))
}

/// Whether a domain's shield is currently active, as last published by any process
pub fn read_domain_active(store: &dyn Store, domain: ShieldDomainKind) -> StoreResult<bool> {
    Ok(store
        .get_shared(&shield_active_key(domain))?
        .is_some_and(|v| v == "true"))
}

/// Publish a domain's active flag and app set
pub fn write_domain_state(
    store: &dyn Store,
    domain: ShieldDomainKind,
    active: bool,
    apps: &BTreeSet<AppToken>,
) -> StoreResult<()> {
    store.set_shared(&shield_apps_key(domain), &serde_json::to_string(apps)?)?;
    store.set_shared(
        &shield_active_key(domain),
        if active { "true" } else { "false" },
    )
}

/// Read an RFC 3339 timestamp key; unparsable values read as absent
pub fn read_timestamp(store: &dyn Store, key: &str) -> StoreResult<Option<DateTime<Local>>> {
    Ok(store.get_shared(key)?.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Local))
            .ok()
    }))
}

/// Write an RFC 3339 timestamp key, removing it for `None`
pub fn write_timestamp(
    store: &dyn Store,
    key: &str,
    at: Option<DateTime<Local>>,
) -> StoreResult<()> {
    match at {
        Some(at) => store.set_shared(key, &at.to_rfc3339()),
        None => store.remove_shared(key),
    }
}

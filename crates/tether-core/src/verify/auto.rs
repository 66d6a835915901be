//! Auto-verification bypass
//!
//! A user who already made enough genuine connections today gets new
//! prosocial challenges resolved immediately.

use chrono::{DateTime, Local};
use tether_api::ConnectionLogEntry;
use tether_util::day_of;

/// Genuine (non-attempt) connections logged on the calendar day of `now`
pub fn genuine_connections_today(entries: &[ConnectionLogEntry], now: &DateTime<Local>) -> usize {
    let today = day_of(now);
    entries
        .iter()
        .filter(|e| e.connection_type.is_genuine() && day_of(&e.timestamp) == today)
        .count()
}

pub fn should_auto_verify(
    entries: &[ConnectionLogEntry],
    now: &DateTime<Local>,
    required: u32,
) -> bool {
    required > 0 && genuine_connections_today(entries, now) >= required as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_api::ConnectionType;

    fn entry(timestamp: DateTime<Local>, connection_type: ConnectionType) -> ConnectionLogEntry {
        ConnectionLogEntry {
            contact_identifier: None,
            contact_name: None,
            timestamp,
            duration_seconds: 60,
            connection_type,
        }
    }

    #[test]
    fn attempts_do_not_count() {
        let now = tether_util::now();
        let entries = vec![
            entry(now, ConnectionType::Call),
            entry(now, ConnectionType::Text),
            entry(now, ConnectionType::CallAttempted),
        ];
        assert_eq!(genuine_connections_today(&entries, &now), 2);
        assert!(!should_auto_verify(&entries, &now, 3));
    }

    #[test]
    fn three_genuine_today_bypass() {
        let now = tether_util::now();
        let mut entries = vec![
            entry(now, ConnectionType::Call),
            entry(now, ConnectionType::Text),
            entry(now - chrono::Duration::days(1), ConnectionType::Call),
        ];
        assert!(!should_auto_verify(&entries, &now, 3));

        entries.push(entry(now, ConnectionType::Text));
        assert!(should_auto_verify(&entries, &now, 3));
    }

    #[test]
    fn zero_requirement_disables_bypass() {
        let now = tether_util::now();
        assert!(!should_auto_verify(&[], &now, 0));
    }
}

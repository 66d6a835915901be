//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tether_api::{Challenge, ConnectionLogEntry, Contact};
use tether_util::{ChallengeId, ContactId};
use tracing::{debug, warn};

use crate::{AuditEvent, EscalationSnapshot, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        // Another process may hold the database while publishing shield flags
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Cross-process flags
            CREATE TABLE IF NOT EXISTS shared_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Escalation state (single row)
            CREATE TABLE IF NOT EXISTS escalation (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                snapshot_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS challenges (
                id TEXT PRIMARY KEY,
                issued_at_epoch INTEGER NOT NULL,
                terminal INTEGER NOT NULL DEFAULT 0,
                challenge_json TEXT NOT NULL
            );

            -- Connection log (append-only)
            CREATE TABLE IF NOT EXISTS connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_epoch INTEGER NOT NULL,
                entry_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contacts (
                identifier TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_challenges_open ON challenges(terminal, issued_at_epoch);
            CREATE INDEX IF NOT EXISTS idx_connections_ts ON connections(timestamp_epoch);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Local> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| tether_util::now())
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.lock()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_timestamp(&timestamp_str),
                event,
            });
        }

        Ok(events)
    }

    fn get_shared(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM shared_kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_shared(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO shared_kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, tether_util::now().to_rfc3339()],
        )?;

        debug!(key, value, "Shared key written");
        Ok(())
    }

    fn remove_shared(&self, key: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM shared_kv WHERE key = ?", [key])?;
        Ok(())
    }

    fn load_escalation(&self) -> StoreResult<Option<EscalationSnapshot>> {
        let conn = self.lock()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM escalation WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn save_escalation(&self, snapshot: &EscalationSnapshot) -> StoreResult<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(snapshot)?;

        conn.execute(
            r#"
            INSERT INTO escalation (id, snapshot_json)
            VALUES (1, ?)
            ON CONFLICT(id)
            DO UPDATE SET snapshot_json = excluded.snapshot_json
            "#,
            [json],
        )?;

        debug!(day = %snapshot.day, level = snapshot.current_level, "Escalation saved");
        Ok(())
    }

    fn save_challenge(&self, challenge: &Challenge) -> StoreResult<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(challenge)?;

        conn.execute(
            r#"
            INSERT INTO challenges (id, issued_at_epoch, terminal, challenge_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id)
            DO UPDATE SET terminal = excluded.terminal, challenge_json = excluded.challenge_json
            "#,
            params![
                challenge.id.to_string(),
                challenge.issued_at.timestamp(),
                challenge.is_terminal(),
                json
            ],
        )?;

        debug!(challenge_id = %challenge.id, terminal = challenge.is_terminal(), "Challenge saved");
        Ok(())
    }

    fn get_challenge(&self, id: &ChallengeId) -> StoreResult<Option<Challenge>> {
        let conn = self.lock()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT challenge_json FROM challenges WHERE id = ?",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn open_challenges(&self) -> StoreResult<Vec<Challenge>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT challenge_json FROM challenges WHERE terminal = 0 ORDER BY issued_at_epoch",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut challenges = Vec::new();
        for row in rows {
            challenges.push(serde_json::from_str(&row?)?);
        }
        Ok(challenges)
    }

    fn append_connection(&self, entry: &ConnectionLogEntry) -> StoreResult<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(entry)?;

        conn.execute(
            "INSERT INTO connections (timestamp_epoch, entry_json) VALUES (?, ?)",
            params![entry.timestamp.timestamp(), json],
        )?;

        debug!(
            connection_type = ?entry.connection_type,
            duration_seconds = entry.duration_seconds,
            "Connection logged"
        );
        Ok(())
    }

    fn connections_since(&self, since: DateTime<Local>) -> StoreResult<Vec<ConnectionLogEntry>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT entry_json FROM connections WHERE timestamp_epoch >= ? ORDER BY timestamp_epoch, id",
        )?;
        let rows = stmt.query_map([since.timestamp()], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row?)?);
        }
        Ok(entries)
    }

    fn list_contacts(&self) -> StoreResult<Vec<Contact>> {
        let conn = self.lock()?;

        let mut stmt =
            conn.prepare("SELECT identifier, name, phone FROM contacts ORDER BY identifier")?;
        let rows = stmt.query_map([], |row| {
            let identifier: String = row.get(0)?;
            Ok(Contact {
                identifier: ContactId::new(identifier),
                name: row.get(1)?,
                phone: row.get(2)?,
            })
        })?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    fn upsert_contact(&self, contact: &Contact) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO contacts (identifier, name, phone)
            VALUES (?, ?, ?)
            ON CONFLICT(identifier)
            DO UPDATE SET name = excluded.name, phone = excluded.phone
            "#,
            params![contact.identifier.as_str(), contact.name, contact.phone],
        )?;

        debug!(contact = %contact.identifier, "Contact saved");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

//! `SQLite` connection handle shared by the ledger and the trust repository.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use agent_primitives::{LedgerEventType, RiskGrade};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, Row};

use crate::entry::{LedgerEntry, Payload};
use crate::{LedgerError, LedgerResult};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

pub(crate) const ENTRY_COLUMNS: &str = "id, timestamp, event_type, agent_did, agent_trust_at_action, \
     artifact_path, artifact_hash, risk_grade, overseer_did, overseer_decision, payload, \
     entry_hash, prev_hash, signature";

/// Formats a timestamp the way the ledger stores and hashes it.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Cloneable handle to the governance database.
///
/// The ledger appends through it; other components (agent trust) may use
/// [`with_connection`](Self::with_connection) for their own table but must
/// never write to `soa_ledger`.
#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl LedgerStore {
    /// Opens or creates the database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database path, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runs `f` with exclusive access to the connection.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Poisoned`] if a previous holder panicked, or
    /// whatever `f` returns.
    pub fn with_connection<T, E>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        let mut guard = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        f(&mut guard)
    }

    /// [`with_connection`](Self::with_connection) on the blocking pool.
    ///
    /// # Errors
    ///
    /// As `with_connection`, plus [`LedgerError::Blocking`] when the task dies.
    pub async fn with_connection_async<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<LedgerError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_connection(f))
            .await
            .map_err(|err| E::from(LedgerError::Blocking(err.to_string())))?
    }
}

/// Raw ledger row exactly as stored.
#[derive(Debug, Clone)]
pub(crate) struct StoredRow {
    pub id: i64,
    pub timestamp: String,
    pub event_type: String,
    pub agent_did: String,
    pub agent_trust_at_action: Option<f64>,
    pub artifact_path: Option<String>,
    pub artifact_hash: Option<String>,
    pub risk_grade: Option<String>,
    pub overseer_did: Option<String>,
    pub overseer_decision: Option<String>,
    pub payload: String,
    pub entry_hash: String,
    pub prev_hash: String,
    pub signature: String,
}

impl StoredRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            event_type: row.get(2)?,
            agent_did: row.get(3)?,
            agent_trust_at_action: row.get(4)?,
            artifact_path: row.get(5)?,
            artifact_hash: row.get(6)?,
            risk_grade: row.get(7)?,
            overseer_did: row.get(8)?,
            overseer_decision: row.get(9)?,
            payload: row.get(10)?,
            entry_hash: row.get(11)?,
            prev_hash: row.get(12)?,
            signature: row.get(13)?,
        })
    }

    pub fn parse_payload(&self) -> LedgerResult<Payload> {
        serde_json::from_str(&self.payload).map_err(|err| self.malformed(err))
    }

    fn malformed(&self, reason: impl ToString) -> LedgerError {
        LedgerError::Malformed {
            id: self.id,
            reason: reason.to_string(),
        }
    }

    pub fn into_entry(self) -> LedgerResult<LedgerEntry> {
        let payload = self.parse_payload()?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|err| self.malformed(err))?
            .with_timezone(&Utc);
        let event_type: LedgerEventType =
            self.event_type.parse().map_err(|err| self.malformed(err))?;
        let risk_grade = self
            .risk_grade
            .as_deref()
            .map(str::parse::<RiskGrade>)
            .transpose()
            .map_err(|err| self.malformed(err))?;

        Ok(LedgerEntry {
            id: self.id,
            timestamp,
            event_type,
            agent_did: self.agent_did,
            agent_trust_at_action: self.agent_trust_at_action,
            artifact_path: self.artifact_path,
            artifact_hash: self.artifact_hash,
            risk_grade,
            overseer_did: self.overseer_did,
            overseer_decision: self.overseer_decision,
            payload,
            entry_hash: self.entry_hash,
            prev_hash: self.prev_hash,
            signature: self.signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_file_database_and_creates_parents() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("ledger-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("ledger.db");

        let store = LedgerStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));

        let tables: i64 = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                     AND name IN ('soa_ledger', 'agent_trust')",
                    [],
                    |row| row.get(0),
                )
                .map_err(LedgerError::from)
            })
            .unwrap();
        assert_eq!(tables, 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn timestamps_use_millisecond_precision() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.678901Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(ts), "2026-01-02T03:04:05.678Z");
    }
}

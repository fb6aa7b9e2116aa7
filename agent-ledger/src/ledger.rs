//! The governance ledger: append, query, and verify.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use agent_config::SecretStore;
use agent_primitives::LedgerEventType;
use chrono::{SubsecRound, Utc};
use rusqlite::{OptionalExtension, params};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::chain::{
    ChainFailure, ChainFailureKind, ChainReport, SignedColumns, SigningKey, compute_entry_hash,
};
use crate::entry::{AppendRequest, GENESIS_HASH, LedgerEntry};
use crate::store::{ENTRY_COLUMNS, LedgerStore, StoredRow, format_timestamp};
use crate::{LedgerError, LedgerResult};

enum Backend {
    Available {
        store: LedgerStore,
        key: SigningKey,
        /// Hash of the newest persisted entry. Only `append_entry` advances it.
        last_hash: Mutex<String>,
    },
    Unavailable {
        reason: String,
    },
}

/// Append-only, hash-chained, HMAC-signed audit log.
///
/// When the store cannot be opened the ledger runs in stub mode: appends
/// return entries marked with [`STUB_HASH`](crate::STUB_HASH), queries return
/// nothing, and the chain never verifies.
///
/// Clones share one store and chain head. The `*_async` variants run the
/// `SQLite` work on the blocking pool and are what async callers should use.
#[derive(Clone)]
pub struct Ledger {
    backend: Arc<Backend>,
}

impl Ledger {
    /// Opens the ledger at `path`, loading (or creating) the signing key.
    ///
    /// Never fails: any error puts the ledger into stub mode and is logged.
    pub async fn open(path: impl AsRef<Path>, secrets: &dyn SecretStore) -> Self {
        let path = path.as_ref();
        let opened = match LedgerStore::open(path) {
            Ok(store) => match SigningKey::load_or_create(secrets).await {
                Ok(key) => Self::from_parts(store, key),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        match opened {
            Ok(ledger) => {
                info!(path = %path.display(), "ledger opened");
                ledger
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ledger unavailable; running in stub mode");
                Self::unavailable(err.to_string())
            }
        }
    }

    /// Creates a ledger on an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema cannot be applied or the signing key
    /// cannot be loaded.
    pub async fn in_memory(secrets: &dyn SecretStore) -> LedgerResult<Self> {
        let store = LedgerStore::in_memory()?;
        let key = SigningKey::load_or_create(secrets).await?;
        Self::from_parts(store, key)
    }

    /// Builds a ledger over an open store, resuming the chain from its last row.
    ///
    /// # Errors
    ///
    /// Returns an error when the chain head cannot be read.
    pub fn from_parts(store: LedgerStore, key: SigningKey) -> LedgerResult<Self> {
        let head: Option<String> = store.with_connection(|conn| {
            conn.query_row(
                "SELECT entry_hash FROM soa_ledger ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::from)
        })?;

        Ok(Self {
            backend: Arc::new(Backend::Available {
                store,
                key,
                last_hash: Mutex::new(head.unwrap_or_else(|| GENESIS_HASH.to_owned())),
            }),
        })
    }

    /// Creates a ledger in stub mode.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            backend: Arc::new(Backend::Unavailable {
                reason: reason.into(),
            }),
        }
    }

    /// Whether entries are actually persisted.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(*self.backend, Backend::Available { .. })
    }

    /// Why the ledger runs in stub mode, if it does.
    #[must_use]
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &*self.backend {
            Backend::Available { .. } => None,
            Backend::Unavailable { reason } => Some(reason),
        }
    }

    /// Shared database handle, absent in stub mode.
    #[must_use]
    pub fn store(&self) -> Option<LedgerStore> {
        match &*self.backend {
            Backend::Available { store, .. } => Some(store.clone()),
            Backend::Unavailable { .. } => None,
        }
    }

    /// Hash the next entry will chain from; `None` in stub mode.
    #[must_use]
    pub fn last_hash(&self) -> Option<String> {
        match &*self.backend {
            Backend::Available { last_hash, .. } => Some(
                last_hash
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            Backend::Unavailable { .. } => None,
        }
    }

    /// Appends an entry, chaining it to the previous one and signing it.
    ///
    /// In stub mode a marked, unpersisted entry is returned instead.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload cannot be serialized or the insert
    /// fails; the chain head is left unchanged in that case.
    pub fn append_entry(&self, request: AppendRequest) -> LedgerResult<LedgerEntry> {
        let timestamp = Utc::now().trunc_subsecs(3);
        let Backend::Available {
            store,
            key,
            last_hash,
        } = &*self.backend
        else {
            debug!(event_type = %request.event_type, "ledger stub append");
            return Ok(LedgerEntry::stub(request, timestamp));
        };

        let mut head = last_hash.lock().map_err(|_| LedgerError::Poisoned)?;
        let timestamp_text = format_timestamp(timestamp);
        let prev_hash = head.clone();
        let entry_hash = compute_entry_hash(
            &timestamp_text,
            request.event_type.as_str(),
            &request.agent_did,
            &request.payload,
            &prev_hash,
        );
        let payload_text = serde_json::to_string(&request.payload)?;
        let risk_grade = request.risk_grade.map(|grade| grade.as_str());

        let (id, signature) = store.with_connection(|conn| {
            let tx = conn.transaction()?;
            let id: i64 =
                tx.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM soa_ledger", [], |row| {
                    row.get(0)
                })?;
            let signature = key.sign(&SignedColumns {
                id,
                entry_hash: &entry_hash,
                agent_trust_at_action: request.agent_trust_at_action,
                artifact_path: request.artifact_path.as_deref(),
                artifact_hash: request.artifact_hash.as_deref(),
                risk_grade,
                overseer_did: request.overseer_did.as_deref(),
                overseer_decision: request.overseer_decision.as_deref(),
            })?;
            tx.execute(
                "INSERT INTO soa_ledger (id, timestamp, event_type, agent_did, agent_trust_at_action, \
                 artifact_path, artifact_hash, risk_grade, overseer_did, overseer_decision, payload, \
                 entry_hash, prev_hash, signature) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    id,
                    timestamp_text,
                    request.event_type.as_str(),
                    request.agent_did,
                    request.agent_trust_at_action,
                    request.artifact_path,
                    request.artifact_hash,
                    risk_grade,
                    request.overseer_did,
                    request.overseer_decision,
                    payload_text,
                    entry_hash,
                    prev_hash,
                    signature,
                ],
            )?;
            tx.commit()?;
            Ok::<_, LedgerError>((id, signature))
        })?;

        *head = entry_hash.clone();
        debug!(id, event_type = %request.event_type, "ledger entry appended");

        Ok(LedgerEntry {
            id,
            timestamp,
            event_type: request.event_type,
            agent_did: request.agent_did,
            agent_trust_at_action: request.agent_trust_at_action,
            artifact_path: request.artifact_path,
            artifact_hash: request.artifact_hash,
            risk_grade: request.risk_grade,
            overseer_did: request.overseer_did,
            overseer_decision: request.overseer_decision,
            payload: request.payload,
            entry_hash,
            prev_hash,
            signature,
        })
    }

    /// Most recent entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row is malformed.
    pub fn get_recent_entries(&self, limit: usize) -> LedgerResult<Vec<LedgerEntry>> {
        self.select(
            &format!("SELECT {ENTRY_COLUMNS} FROM soa_ledger ORDER BY id DESC LIMIT ?1"),
            params![to_sql_limit(limit)],
        )
    }

    /// Entries of one type, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row is malformed.
    pub fn get_entries_by_type(
        &self,
        event_type: LedgerEventType,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        self.select(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM soa_ledger WHERE event_type = ?1 ORDER BY id DESC LIMIT ?2"
            ),
            params![event_type.as_str(), to_sql_limit(limit)],
        )
    }

    /// Entries recorded for one agent, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row is malformed.
    pub fn get_entries_by_agent(
        &self,
        agent_did: &str,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        self.select(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM soa_ledger WHERE agent_did = ?1 ORDER BY id DESC LIMIT ?2"
            ),
            params![agent_did, to_sql_limit(limit)],
        )
    }

    /// Entries touching one artifact, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row is malformed.
    pub fn get_entries_by_artifact(
        &self,
        artifact_path: &str,
        limit: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        self.select(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM soa_ledger WHERE artifact_path = ?1 ORDER BY id DESC LIMIT ?2"
            ),
            params![artifact_path, to_sql_limit(limit)],
        )
    }

    /// Fetches one entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] when no such entry exists (always the
    /// case in stub mode).
    pub fn get_entry_by_id(&self, id: i64) -> LedgerResult<LedgerEntry> {
        self.select(
            &format!("SELECT {ENTRY_COLUMNS} FROM soa_ledger WHERE id = ?1"),
            params![id],
        )?
        .pop()
        .ok_or(LedgerError::NotFound { id })
    }

    /// Number of persisted entries.
    ///
    /// # Errors
    ///
    /// Returns an error when the count query fails.
    pub fn entry_count(&self) -> LedgerResult<u64> {
        let Backend::Available { store, .. } = &*self.backend else {
            return Ok(0);
        };
        let count: i64 = store.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM soa_ledger", [], |row| row.get(0))
                .map_err(LedgerError::from)
        })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Walks every entry in insertion order and reports the first integrity
    /// failure: broken `prevHash` linkage, `entryHash` mismatch, or signature
    /// mismatch.
    ///
    /// # Errors
    ///
    /// Returns an error only when the rows cannot be read at all.
    pub fn audit_chain(&self) -> LedgerResult<ChainReport> {
        let Backend::Available { store, key, .. } = &*self.backend else {
            return Ok(ChainReport {
                entries_checked: 0,
                failure: Some(ChainFailure {
                    entry_id: 0,
                    kind: ChainFailureKind::Unavailable,
                }),
            });
        };

        let rows = store.with_connection(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {ENTRY_COLUMNS} FROM soa_ledger ORDER BY id ASC"))?;
            let rows = stmt
                .query_map([], StoredRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, LedgerError>(rows)
        })?;

        let mut expected_prev = GENESIS_HASH.to_owned();
        for (checked, row) in rows.iter().enumerate() {
            if let Some(kind) = check_row(row, &expected_prev, key) {
                error!(entry_id = row.id, failure = ?kind, "ledger chain verification failed");
                return Ok(ChainReport {
                    entries_checked: checked,
                    failure: Some(ChainFailure {
                        entry_id: row.id,
                        kind,
                    }),
                });
            }
            expected_prev.clone_from(&row.entry_hash);
        }

        Ok(ChainReport {
            entries_checked: rows.len(),
            failure: None,
        })
    }

    /// Whether the whole chain verifies. Fails closed on any error.
    #[must_use]
    pub fn verify_chain(&self) -> bool {
        match self.audit_chain() {
            Ok(report) => report.is_intact(),
            Err(err) => {
                error!(error = %err, "ledger chain could not be read");
                false
            }
        }
    }

    /// [`append_entry`](Self::append_entry) on the blocking pool.
    ///
    /// # Errors
    ///
    /// As `append_entry`, plus [`LedgerError::Blocking`] when the task dies.
    pub async fn append_entry_async(&self, request: AppendRequest) -> LedgerResult<LedgerEntry> {
        let ledger = self.clone();
        blocking(move || ledger.append_entry(request)).await
    }

    /// [`get_entry_by_id`](Self::get_entry_by_id) on the blocking pool.
    ///
    /// # Errors
    ///
    /// As `get_entry_by_id`, plus [`LedgerError::Blocking`] when the task dies.
    pub async fn get_entry_by_id_async(&self, id: i64) -> LedgerResult<LedgerEntry> {
        let ledger = self.clone();
        blocking(move || ledger.get_entry_by_id(id)).await
    }

    /// [`get_recent_entries`](Self::get_recent_entries) on the blocking pool.
    ///
    /// # Errors
    ///
    /// As `get_recent_entries`, plus [`LedgerError::Blocking`] when the task
    /// dies.
    pub async fn get_recent_entries_async(&self, limit: usize) -> LedgerResult<Vec<LedgerEntry>> {
        let ledger = self.clone();
        blocking(move || ledger.get_recent_entries(limit)).await
    }

    fn select(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let Backend::Available { store, .. } = &*self.backend else {
            return Ok(Vec::new());
        };
        let rows = store.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params, StoredRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, LedgerError>(rows)
        })?;
        rows.into_iter().map(StoredRow::into_entry).collect()
    }
}

async fn blocking<T, F>(work: F) -> LedgerResult<T>
where
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| LedgerError::Blocking(err.to_string()))?
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn check_row(row: &StoredRow, expected_prev: &str, key: &SigningKey) -> Option<ChainFailureKind> {
    if row.event_type.parse::<LedgerEventType>().is_err() {
        return Some(ChainFailureKind::Malformed);
    }
    let Ok(payload) = row.parse_payload() else {
        return Some(ChainFailureKind::Malformed);
    };
    if !bool::from(row.prev_hash.as_bytes().ct_eq(expected_prev.as_bytes())) {
        return Some(ChainFailureKind::BrokenLink);
    }
    let recomputed = compute_entry_hash(
        &row.timestamp,
        &row.event_type,
        &row.agent_did,
        &payload,
        &row.prev_hash,
    );
    if !bool::from(recomputed.as_bytes().ct_eq(row.entry_hash.as_bytes())) {
        return Some(ChainFailureKind::HashMismatch);
    }
    let columns = SignedColumns {
        id: row.id,
        entry_hash: &row.entry_hash,
        agent_trust_at_action: row.agent_trust_at_action,
        artifact_path: row.artifact_path.as_deref(),
        artifact_hash: row.artifact_hash.as_deref(),
        risk_grade: row.risk_grade.as_deref(),
        overseer_did: row.overseer_did.as_deref(),
        overseer_decision: row.overseer_decision.as_deref(),
    };
    if !key.verify(&columns, &row.signature) {
        return Some(ChainFailureKind::SignatureMismatch);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_config::InMemorySecretStore;
    use agent_primitives::RiskGrade;

    use crate::STUB_HASH;

    async fn ledger_with_entries(count: usize) -> Ledger {
        let secrets = InMemorySecretStore::new();
        let ledger = Ledger::in_memory(&secrets).await.unwrap();
        for index in 0..count {
            ledger
                .append_entry(
                    AppendRequest::new(LedgerEventType::EvaluationRouted, "did:myth:sentinel:01")
                        .artifact_path(format!("src/file_{index}.rs"))
                        .artifact_hash(Some(format!("{index:064}")))
                        .risk_grade(RiskGrade::L2)
                        .trust_at_action(0.35)
                        .overseer("did:myth:overseer:02", "none")
                        .field("index", index),
                )
                .unwrap();
        }
        ledger
    }

    fn tamper(ledger: &Ledger, sql: &str) {
        ledger
            .store()
            .unwrap()
            .with_connection(|conn| conn.execute(sql, []).map_err(LedgerError::from))
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_async_appends_keep_one_chain() {
        let ledger = ledger_with_entries(0).await;
        let mut handles = Vec::new();
        for index in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append_entry_async(
                        AppendRequest::new(LedgerEventType::GovernanceResumed, "did:myth:scribe:01")
                            .field("index", index),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.entry_count().unwrap(), 16);
        assert!(ledger.verify_chain());
        let newest = ledger.get_recent_entries_async(1).await.unwrap();
        let fetched = ledger.get_entry_by_id_async(newest[0].id).await.unwrap();
        assert_eq!(fetched, newest[0]);
        assert_eq!(ledger.last_hash().as_deref(), Some(newest[0].entry_hash.as_str()));
    }

    #[tokio::test]
    async fn entries_chain_from_genesis() {
        let ledger = ledger_with_entries(3).await;
        let entries = ledger.get_recent_entries(10).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].prev_hash, GENESIS_HASH);
        assert_eq!(entries[1].prev_hash, entries[2].entry_hash);
        assert_eq!(entries[0].prev_hash, entries[1].entry_hash);
        assert_eq!(ledger.last_hash().as_deref(), Some(entries[0].entry_hash.as_str()));
        assert!(ledger.verify_chain());
        assert_eq!(ledger.audit_chain().unwrap().entries_checked, 3);
    }

    #[tokio::test]
    async fn appended_entry_matches_stored_entry() {
        let ledger = ledger_with_entries(1).await;
        let appended = ledger
            .append_entry(
                AppendRequest::new(LedgerEventType::SystemEvent, "system").field("boot", true),
            )
            .unwrap();
        let stored = ledger.get_entry_by_id(appended.id).unwrap();
        assert_eq!(appended, stored);
        assert_eq!(stored.payload_str("missing"), None);
    }

    #[tokio::test]
    async fn any_column_mutation_breaks_verification() {
        let mutations = [
            "UPDATE soa_ledger SET timestamp = '2000-01-01T00:00:00.000Z' WHERE id = 2",
            "UPDATE soa_ledger SET event_type = 'SYSTEM_EVENT' WHERE id = 2",
            "UPDATE soa_ledger SET agent_did = 'did:myth:scrivener:ff' WHERE id = 2",
            "UPDATE soa_ledger SET agent_trust_at_action = 0.99 WHERE id = 2",
            "UPDATE soa_ledger SET artifact_path = 'src/other.rs' WHERE id = 2",
            "UPDATE soa_ledger SET artifact_hash = 'beef' WHERE id = 2",
            "UPDATE soa_ledger SET risk_grade = 'L1' WHERE id = 2",
            "UPDATE soa_ledger SET overseer_did = 'did:myth:overseer:ff' WHERE id = 2",
            "UPDATE soa_ledger SET overseer_decision = 'APPROVED' WHERE id = 2",
            "UPDATE soa_ledger SET payload = '{\"index\":7}' WHERE id = 2",
            "UPDATE soa_ledger SET entry_hash = 'abc' WHERE id = 2",
            "UPDATE soa_ledger SET prev_hash = 'abc' WHERE id = 2",
            "UPDATE soa_ledger SET signature = 'abcd' WHERE id = 2",
            "UPDATE soa_ledger SET id = 9 WHERE id = 3",
        ];

        for sql in mutations {
            let ledger = ledger_with_entries(3).await;
            assert!(ledger.verify_chain());
            tamper(&ledger, sql);
            assert!(!ledger.verify_chain(), "mutation went undetected: {sql}");
        }
    }

    #[tokio::test]
    async fn deleted_row_breaks_linkage() {
        let ledger = ledger_with_entries(3).await;
        tamper(&ledger, "DELETE FROM soa_ledger WHERE id = 2");

        let report = ledger.audit_chain().unwrap();
        assert_eq!(
            report.failure,
            Some(ChainFailure {
                entry_id: 3,
                kind: ChainFailureKind::BrokenLink,
            })
        );
        assert_eq!(report.entries_checked, 1);
    }

    #[tokio::test]
    async fn queries_filter_by_type_agent_and_artifact() {
        let ledger = ledger_with_entries(2).await;
        ledger
            .append_entry(AppendRequest::new(LedgerEventType::TrustUpdate, "did:myth:judge:03"))
            .unwrap();

        assert_eq!(
            ledger
                .get_entries_by_type(LedgerEventType::EvaluationRouted, 10)
                .unwrap()
                .len(),
            2
        );
        assert_eq!(ledger.get_entries_by_agent("did:myth:judge:03", 10).unwrap().len(), 1);
        let by_artifact = ledger.get_entries_by_artifact("src/file_1.rs", 10).unwrap();
        assert_eq!(by_artifact.len(), 1);
        assert_eq!(by_artifact[0].payload["index"], 1);
        assert_eq!(ledger.entry_count().unwrap(), 3);
        assert!(matches!(
            ledger.get_entry_by_id(42),
            Err(LedgerError::NotFound { id: 42 })
        ));
    }

    #[tokio::test]
    async fn reopening_resumes_the_chain() {
        let mut path = std::env::temp_dir();
        path.push(format!("ledger-{}", uuid::Uuid::new_v4()));
        let db = path.join("soa_ledger.db");
        let secrets = InMemorySecretStore::new();

        let first = Ledger::open(&db, &secrets).await;
        assert!(first.is_available());
        let entry = first
            .append_entry(AppendRequest::new(LedgerEventType::SystemEvent, "system"))
            .unwrap();
        drop(first);

        let second = Ledger::open(&db, &secrets).await;
        assert_eq!(second.last_hash(), Some(entry.entry_hash.clone()));
        let next = second
            .append_entry(AppendRequest::new(LedgerEventType::SystemEvent, "system"))
            .unwrap();
        assert_eq!(next.prev_hash, entry.entry_hash);
        assert!(second.verify_chain());

        let _ = std::fs::remove_dir_all(path);
    }

    #[tokio::test]
    async fn unopenable_store_degrades_to_stub_mode() {
        let mut blocker = std::env::temp_dir();
        blocker.push(format!("ledger-blocker-{}", uuid::Uuid::new_v4()));
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let ledger = Ledger::open(blocker.join("soa_ledger.db"), &InMemorySecretStore::new()).await;
        assert!(!ledger.is_available());
        assert!(ledger.unavailable_reason().is_some());

        let entry = ledger
            .append_entry(AppendRequest::new(LedgerEventType::SystemEvent, "system"))
            .unwrap();
        assert!(entry.is_stub());
        assert_eq!(entry.entry_hash, STUB_HASH);
        assert!(ledger.get_recent_entries(5).unwrap().is_empty());
        assert!(!ledger.verify_chain());

        let _ = std::fs::remove_file(blocker);
    }
}

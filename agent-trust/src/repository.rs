//! Persistence for agent identities with optimistic concurrency.

use std::collections::HashMap;

use agent_ledger::{LedgerStore, format_timestamp};
use agent_primitives::AgentDid;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tokio::sync::Mutex;

use crate::model::AgentIdentity;
use crate::{TrustError, TrustResult};

/// Storage seam for agent identities.
///
/// Writes are conditional on the caller's view of the row version so that two
/// interleaved read-modify-write cycles can never silently overwrite each
/// other.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Loads one agent.
    async fn fetch(&self, did: &AgentDid) -> TrustResult<Option<AgentIdentity>>;

    /// Inserts a new agent. Returns `false` when the DID already exists.
    async fn insert(&self, agent: &AgentIdentity) -> TrustResult<bool>;

    /// Writes `agent` if the stored version still equals `agent.version`,
    /// returning the new version.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::VersionConflict`] when the stored version moved on
    /// (or the row vanished).
    async fn update(&self, agent: &AgentIdentity) -> TrustResult<i64>;

    /// Lists all agents ordered by DID.
    async fn list(&self) -> TrustResult<Vec<AgentIdentity>>;
}

/// Volatile repository used when the ledger database is unavailable, and in tests.
#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: Mutex<HashMap<AgentDid, AgentIdentity>>,
}

impl InMemoryAgentRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn fetch(&self, did: &AgentDid) -> TrustResult<Option<AgentIdentity>> {
        Ok(self.agents.lock().await.get(did).cloned())
    }

    async fn insert(&self, agent: &AgentIdentity) -> TrustResult<bool> {
        let mut agents = self.agents.lock().await;
        if agents.contains_key(&agent.did) {
            return Ok(false);
        }
        agents.insert(agent.did.clone(), agent.clone());
        Ok(true)
    }

    async fn update(&self, agent: &AgentIdentity) -> TrustResult<i64> {
        let mut agents = self.agents.lock().await;
        match agents.get_mut(&agent.did) {
            Some(stored) if stored.version == agent.version => {
                let version = agent.version + 1;
                *stored = AgentIdentity {
                    version,
                    ..agent.clone()
                };
                Ok(version)
            }
            _ => Err(TrustError::VersionConflict {
                did: agent.did.clone(),
                expected: agent.version,
            }),
        }
    }

    async fn list(&self) -> TrustResult<Vec<AgentIdentity>> {
        let mut agents: Vec<_> = self.agents.lock().await.values().cloned().collect();
        agents.sort_by(|a, b| a.did.cmp(&b.did));
        Ok(agents)
    }
}

const AGENT_COLUMNS: &str = "did, persona, public_key, trust_score, trust_stage, is_quarantined, \
     verification_count, created_at, updated_at, version, revoked_at";

/// Repository over the `agent_trust` table of the ledger database.
#[derive(Clone)]
pub struct SqliteAgentRepository {
    store: LedgerStore,
}

impl SqliteAgentRepository {
    /// Uses the ledger's database handle.
    #[must_use]
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }
}

struct AgentRow {
    did: String,
    persona: String,
    public_key: String,
    trust_score: f64,
    trust_stage: String,
    is_quarantined: bool,
    verification_count: i64,
    created_at: String,
    updated_at: String,
    version: i64,
    revoked_at: Option<String>,
}

impl AgentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            did: row.get(0)?,
            persona: row.get(1)?,
            public_key: row.get(2)?,
            trust_score: row.get(3)?,
            trust_stage: row.get(4)?,
            is_quarantined: row.get(5)?,
            verification_count: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            version: row.get(9)?,
            revoked_at: row.get(10)?,
        })
    }

    fn into_identity(self) -> TrustResult<AgentIdentity> {
        let malformed = |reason: String| TrustError::Malformed {
            did: self.did.clone(),
            reason,
        };
        let parse_time = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| malformed(err.to_string()))
        };

        Ok(AgentIdentity {
            did: AgentDid::parse(self.did.clone()).map_err(|err| malformed(err.to_string()))?,
            persona: self.persona.parse().map_err(|err: agent_primitives::Error| {
                malformed(err.to_string())
            })?,
            public_key: self.public_key.clone(),
            trust_score: self.trust_score,
            trust_stage: self.trust_stage.parse().map_err(|err: agent_primitives::Error| {
                malformed(err.to_string())
            })?,
            is_quarantined: self.is_quarantined,
            verification_count: u64::try_from(self.verification_count).unwrap_or_default(),
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            version: self.version,
            revoked_at: self.revoked_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

fn count_to_sql(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn fetch(&self, did: &AgentDid) -> TrustResult<Option<AgentIdentity>> {
        let did = did.clone();
        let row = self
            .store
            .with_connection_async(move |conn| {
                conn.query_row(
                    &format!("SELECT {AGENT_COLUMNS} FROM agent_trust WHERE did = ?1"),
                    params![did.as_str()],
                    AgentRow::from_row,
                )
                .optional()
                .map_err(TrustError::from)
            })
            .await?;
        row.map(AgentRow::into_identity).transpose()
    }

    async fn insert(&self, agent: &AgentIdentity) -> TrustResult<bool> {
        let agent = agent.clone();
        let inserted = self
            .store
            .with_connection_async(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO agent_trust (did, persona, public_key, trust_score, trust_stage, \
                     is_quarantined, verification_count, created_at, updated_at, version, revoked_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        agent.did.as_str(),
                        agent.persona.as_str(),
                        agent.public_key,
                        agent.trust_score,
                        agent.trust_stage.as_str(),
                        agent.is_quarantined,
                        count_to_sql(agent.verification_count),
                        format_timestamp(agent.created_at),
                        format_timestamp(agent.updated_at),
                        agent.version,
                        agent.revoked_at.map(format_timestamp),
                    ],
                )
                .map_err(TrustError::from)
            })
            .await?;
        Ok(inserted == 1)
    }

    async fn update(&self, agent: &AgentIdentity) -> TrustResult<i64> {
        let row = agent.clone();
        let changed = self
            .store
            .with_connection_async(move |conn| {
                conn.execute(
                    "UPDATE agent_trust SET trust_score = ?1, trust_stage = ?2, is_quarantined = ?3, \
                     verification_count = ?4, updated_at = ?5, revoked_at = ?6, version = version + 1 \
                     WHERE did = ?7 AND version = ?8",
                    params![
                        row.trust_score,
                        row.trust_stage.as_str(),
                        row.is_quarantined,
                        count_to_sql(row.verification_count),
                        format_timestamp(row.updated_at),
                        row.revoked_at.map(format_timestamp),
                        row.did.as_str(),
                        row.version,
                    ],
                )
                .map_err(TrustError::from)
            })
            .await?;

        if changed == 0 {
            return Err(TrustError::VersionConflict {
                did: agent.did.clone(),
                expected: agent.version,
            });
        }
        Ok(agent.version + 1)
    }

    async fn list(&self) -> TrustResult<Vec<AgentIdentity>> {
        let rows = self
            .store
            .with_connection_async(|conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {AGENT_COLUMNS} FROM agent_trust ORDER BY did"))?;
                let rows = stmt
                    .query_map([], AgentRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, TrustError>(rows)
            })
            .await?;
        rows.into_iter().map(AgentRow::into_identity).collect()
    }
}

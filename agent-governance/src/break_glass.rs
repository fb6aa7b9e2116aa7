//! Time-boxed emergency overrides of the governance mode.
//!
//! At most one override is active. Activation and its end (revocation or
//! natural expiry) each write a `USER_OVERRIDE` ledger entry and report the
//! mode change through the registered callback.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use agent_ledger::{AppendRequest, Ledger};
use agent_primitives::{GovernanceMode, LedgerEventType};
use agent_telemetry::{EventBus, GovernanceEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{GovernanceError, GovernanceResult};

/// Shortest accepted justification, in characters after trimming.
pub const MIN_REASON_CHARS: usize = 10;
/// Longest accepted override.
pub const MAX_DURATION_MINUTES: u32 = 480;
/// Finished overrides kept in memory.
pub const DEFAULT_HISTORY_CAP: usize = 50;
/// Recorded as the actor when an override runs out.
pub const EXPIRY_ACTOR: &str = "system";

/// Invoked with the mode that should now be in force.
pub type ModeCallback = Arc<dyn Fn(GovernanceMode) + Send + Sync>;

/// Lifecycle of an override.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakGlassStatus {
    /// In force.
    Active,
    /// Ran out.
    Expired,
    /// Ended early.
    Revoked,
}

/// A request to open an override.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakGlassRequest {
    /// Justification.
    pub reason: String,
    /// Who asks for the override.
    pub requester: String,
    /// Length of the override.
    pub duration_minutes: u32,
    /// Mode to force while it lasts.
    pub override_mode: GovernanceMode,
}

impl BreakGlassRequest {
    /// Request forcing [`GovernanceMode::Observe`].
    #[must_use]
    pub fn new(reason: impl Into<String>, requester: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            reason: reason.into(),
            requester: requester.into(),
            duration_minutes,
            override_mode: GovernanceMode::Observe,
        }
    }

    /// Forces `mode` instead.
    #[must_use]
    pub fn with_mode(mut self, mode: GovernanceMode) -> Self {
        self.override_mode = mode;
        self
    }

    fn validate(&self) -> GovernanceResult<()> {
        if self.reason.trim().chars().count() < MIN_REASON_CHARS {
            return Err(GovernanceError::validation(format!(
                "reason must be at least {MIN_REASON_CHARS} characters"
            )));
        }
        if self.requester.trim().is_empty() {
            return Err(GovernanceError::validation("requester must not be empty"));
        }
        if !(1..=MAX_DURATION_MINUTES).contains(&self.duration_minutes) {
            return Err(GovernanceError::validation(format!(
                "duration must be between 1 and {MAX_DURATION_MINUTES} minutes"
            )));
        }
        Ok(())
    }
}

/// One override, active or finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakGlassRecord {
    /// Override identifier.
    pub id: Uuid,
    /// Activation time.
    pub activated_at: DateTime<Utc>,
    /// Scheduled expiry.
    pub expires_at: DateTime<Utc>,
    /// Justification, trimmed.
    pub reason: String,
    /// Who opened it.
    pub requester: String,
    /// Mode restored when it ends.
    pub previous_mode: GovernanceMode,
    /// Mode forced while active.
    pub override_mode: GovernanceMode,
    /// Lifecycle state.
    pub status: BreakGlassStatus,
    /// When it ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Who ended it.
    pub ended_by: Option<String>,
}

struct Active {
    record: BreakGlassRecord,
    timer: Option<JoinHandle<()>>,
}

struct State {
    mode: GovernanceMode,
    active: Option<Active>,
    history: VecDeque<BreakGlassRecord>,
}

struct Inner {
    ledger: Arc<Ledger>,
    events: Arc<dyn EventBus>,
    on_mode_change: Option<ModeCallback>,
    history_cap: usize,
    state: Mutex<State>,
    // Held across an activation or ending, including its ledger write; the
    // state mutex is only taken for the synchronous parts.
    transitions: tokio::sync::Mutex<()>,
}

/// Opens, revokes and expires break-glass overrides.
pub struct BreakGlassProtocol {
    inner: Arc<Inner>,
}

impl fmt::Debug for BreakGlassProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakGlassProtocol")
            .field("current_mode", &self.current_mode())
            .field("active", &self.get_active_override().map(|record| record.id))
            .finish_non_exhaustive()
    }
}

impl BreakGlassProtocol {
    /// Protocol starting from `mode`.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, events: Arc<dyn EventBus>, mode: GovernanceMode) -> Self {
        Self::build(ledger, events, mode, None, DEFAULT_HISTORY_CAP)
    }

    fn build(
        ledger: Arc<Ledger>,
        events: Arc<dyn EventBus>,
        mode: GovernanceMode,
        on_mode_change: Option<ModeCallback>,
        history_cap: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                events,
                on_mode_change,
                history_cap,
                state: Mutex::new(State {
                    mode,
                    active: None,
                    history: VecDeque::new(),
                }),
                transitions: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Calls `callback` on every mode change.
    #[must_use]
    pub fn with_mode_callback(self, callback: ModeCallback) -> Self {
        self.rebuild(Some(callback), None)
    }

    /// Keeps at most `cap` finished overrides.
    #[must_use]
    pub fn with_history_cap(self, cap: usize) -> Self {
        self.rebuild(None, Some(cap))
    }

    fn rebuild(self, callback: Option<ModeCallback>, cap: Option<usize>) -> Self {
        let mode = self.current_mode();
        let inner = &self.inner;
        Self::build(
            inner.ledger.clone(),
            inner.events.clone(),
            mode,
            callback.or_else(|| inner.on_mode_change.clone()),
            cap.unwrap_or(inner.history_cap),
        )
    }

    /// Mode currently in force.
    #[must_use]
    pub fn current_mode(&self) -> GovernanceMode {
        self.inner.lock().mode
    }

    /// The override in force, if any.
    #[must_use]
    pub fn get_active_override(&self) -> Option<BreakGlassRecord> {
        self.inner.lock().active.as_ref().map(|active| active.record.clone())
    }

    /// Finished overrides, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<BreakGlassRecord> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Opens an override and schedules its expiry.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::Validation`] for a malformed request,
    /// [`GovernanceError::OverrideActive`] while another override is in
    /// force, and ledger errors from the activation entry. Nothing changes
    /// when an error is returned.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn activate(&self, request: BreakGlassRequest) -> GovernanceResult<BreakGlassRecord> {
        request.validate()?;
        let _transition = self.inner.transitions.lock().await;
        let record = {
            let state = self.inner.lock();
            if let Some(active) = &state.active {
                return Err(GovernanceError::OverrideActive {
                    expires_at: active.record.expires_at,
                });
            }
            let activated_at = Utc::now();
            BreakGlassRecord {
                id: Uuid::new_v4(),
                activated_at,
                expires_at: activated_at + chrono::Duration::minutes(i64::from(request.duration_minutes)),
                reason: request.reason.trim().to_owned(),
                requester: request.requester.trim().to_owned(),
                previous_mode: state.mode,
                override_mode: request.override_mode,
                status: BreakGlassStatus::Active,
                ended_at: None,
                ended_by: None,
            }
        };

        self.inner
            .ledger
            .append_entry_async(
                override_entry(&record, "activate", &record.requester)
                    .field("durationMinutes", request.duration_minutes),
            )
            .await?;

        let timer = self.schedule_expiry(record.id, request.duration_minutes);
        {
            let mut state = self.inner.lock();
            state.mode = record.override_mode;
            state.active = Some(Active {
                record: record.clone(),
                timer: Some(timer),
            });
        }

        info!(
            override_id = %record.id,
            requester = %record.requester,
            mode = %record.override_mode,
            expires_at = %record.expires_at,
            "break-glass override activated"
        );
        self.inner.notify(record.override_mode);
        self.inner.events.publish(GovernanceEvent::BreakGlassActivated {
            override_id: record.id,
            expires_at: record.expires_at,
            override_mode: record.override_mode,
        });
        Ok(record)
    }

    /// Ends the active override early and restores the previous mode.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::NoActiveOverride`] when nothing is in force.
    pub async fn revoke(&self, revoked_by: &str) -> GovernanceResult<BreakGlassRecord> {
        let record = self
            .inner
            .finish(None, BreakGlassStatus::Revoked, revoked_by)
            .await
            .ok_or(GovernanceError::NoActiveOverride)?;
        self.inner.events.publish(GovernanceEvent::BreakGlassRevoked {
            override_id: record.id,
            revoked_by: revoked_by.to_owned(),
        });
        Ok(record)
    }

    /// Drops finished overrides beyond the history cap, returning how many.
    pub fn prune_history(&self) -> usize {
        self.inner.lock().prune(self.inner.history_cap)
    }

    fn schedule_expiry(&self, override_id: Uuid, minutes: u32) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let delay = Duration::from_secs(u64::from(minutes) * 60);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            expire(&inner, override_id).await;
        })
    }
}

impl Drop for BreakGlassProtocol {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.lock().active.as_mut().and_then(|active| active.timer.take()) {
            timer.abort();
        }
    }
}

async fn expire(inner: &Weak<Inner>, override_id: Uuid) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if let Some(record) = inner
        .finish(Some(override_id), BreakGlassStatus::Expired, EXPIRY_ACTOR)
        .await
    {
        inner
            .events
            .publish(GovernanceEvent::BreakGlassExpired { override_id: record.id });
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, mode: GovernanceMode) {
        if let Some(callback) = &self.on_mode_change {
            callback(mode);
        }
    }

    /// Closes the active override. With `expected` set, only that override
    /// is closed; a stale timer finds nothing to do.
    async fn finish(
        &self,
        expected: Option<Uuid>,
        status: BreakGlassStatus,
        actor: &str,
    ) -> Option<BreakGlassRecord> {
        let _transition = self.transitions.lock().await;
        let record = {
            let mut state = self.lock();
            let still_active = state
                .active
                .as_ref()
                .is_some_and(|active| expected.is_none_or(|id| active.record.id == id));
            if !still_active {
                return None;
            }
            let Active { mut record, timer } = state.active.take()?;
            if status == BreakGlassStatus::Revoked {
                if let Some(timer) = timer {
                    timer.abort();
                }
            }
            record.status = status;
            record.ended_at = Some(Utc::now());
            record.ended_by = Some(actor.to_owned());
            state.mode = record.previous_mode;
            state.history.push_back(record.clone());
            state.prune(self.history_cap);
            record
        };

        let action = match status {
            BreakGlassStatus::Expired => "expire",
            _ => "revoke",
        };
        if let Err(err) = self
            .ledger
            .append_entry_async(override_entry(&record, action, actor))
            .await
        {
            warn!(override_id = %record.id, error = %err, "failed to record end of break-glass override");
        }

        info!(
            override_id = %record.id,
            status = ?record.status,
            by = actor,
            restored = %record.previous_mode,
            "break-glass override ended"
        );
        self.notify(record.previous_mode);
        Some(record)
    }
}

impl State {
    fn prune(&mut self, cap: usize) -> usize {
        let excess = self.history.len().saturating_sub(cap);
        self.history.drain(..excess);
        excess
    }
}

fn override_entry(record: &BreakGlassRecord, action: &str, actor: &str) -> AppendRequest {
    AppendRequest::new(LedgerEventType::UserOverride, actor)
        .field("action", action)
        .field("overrideId", record.id.to_string())
        .field("reason", record.reason.as_str())
        .field("requester", record.requester.as_str())
        .field("previousMode", record.previous_mode.as_str())
        .field("overrideMode", record.override_mode.as_str())
        .field("expiresAt", record.expires_at.to_rfc3339())
}

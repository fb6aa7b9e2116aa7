//! Bounded in-memory state: expired nonces and old break-glass records.
//!
//! The ledger itself is append-only and never pruned here.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::break_glass::BreakGlassProtocol;
use crate::l3::L3ApprovalService;
use crate::nonce::NonceStore;

/// Default delay between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// What a sweep removed or found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Expired nonces dropped.
    pub nonces_removed: usize,
    /// Break-glass records dropped from history.
    pub overrides_pruned: usize,
    /// L3 requests past their SLA.
    pub overdue_l3: usize,
}

#[derive(Clone)]
struct Targets {
    nonces: Arc<NonceStore>,
    break_glass: Option<Arc<BreakGlassProtocol>>,
    l3: Option<Arc<L3ApprovalService>>,
}

impl Targets {
    async fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport {
            nonces_removed: self.nonces.sweep(now),
            ..SweepReport::default()
        };
        if let Some(break_glass) = &self.break_glass {
            report.overrides_pruned = break_glass.prune_history();
        }
        if let Some(l3) = &self.l3 {
            match l3.overdue(now).await {
                Ok(overdue) => {
                    for request in &overdue {
                        warn!(
                            request = %request.id,
                            path = %request.artifact_path,
                            deadline = %request.sla_deadline,
                            "L3 approval past SLA"
                        );
                    }
                    report.overdue_l3 = overdue.len();
                }
                Err(err) => warn!(error = %err, "could not inspect L3 queue"),
            }
        }
        debug!(?report, "retention sweep");
        report
    }
}

/// Runs retention on demand or on a fixed interval.
pub struct RetentionSweeper {
    targets: Targets,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("interval", &self.interval)
            .field("worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl RetentionSweeper {
    /// Sweeper over `nonces`, stopped.
    #[must_use]
    pub fn new(nonces: Arc<NonceStore>) -> Self {
        Self {
            targets: Targets {
                nonces,
                break_glass: None,
                l3: None,
            },
            interval: DEFAULT_SWEEP_INTERVAL,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Also caps break-glass history.
    #[must_use]
    pub fn with_break_glass(mut self, break_glass: Arc<BreakGlassProtocol>) -> Self {
        self.targets.break_glass = Some(break_glass);
        self
    }

    /// Also reports L3 requests past their SLA.
    #[must_use]
    pub fn with_l3(mut self, l3: Arc<L3ApprovalService>) -> Self {
        self.targets.l3 = Some(l3);
        self
    }

    /// Overrides the sweep interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sweeps once.
    pub async fn sweep_now(&self) -> SweepReport {
        self.targets.sweep().await
    }

    /// Whether the periodic worker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the periodic worker. Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.shutdown.store(false, Ordering::Release);
        let targets = self.targets.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;
        self.worker = Some(tokio::spawn(run_sweep_loop(targets, shutdown, interval)));
        info!(interval_secs = interval.as_secs(), "retention sweeper started");
    }

    /// Stops the worker and waits for it.
    pub async fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("retention sweeper stopped");
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
    }
}

async fn run_sweep_loop(targets: Targets, shutdown: Arc<AtomicBool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; sweeping starts one interval in.
    ticker.tick().await;

    while !shutdown.load(Ordering::Acquire) {
        ticker.tick().await;
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        targets.sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use agent_config::{InMemorySecretStore, InMemoryStateStore};
    use agent_ledger::Ledger;
    use agent_primitives::{GovernanceMode, RiskGrade};
    use agent_telemetry::CollectingEventBus;
    use agent_trust::TrustEngine;

    use super::*;
    use crate::break_glass::BreakGlassRequest;
    use crate::l3::L3Submission;

    #[tokio::test]
    async fn sweep_drops_expired_nonces_and_reports_overdue_approvals() {
        let ledger = Arc::new(Ledger::in_memory(&InMemorySecretStore::new()).await.unwrap());
        let bus = CollectingEventBus::new();
        let trust = Arc::new(TrustEngine::for_ledger(ledger.clone(), bus.clone()));
        let l3 = Arc::new(L3ApprovalService::new(
            Arc::new(InMemoryStateStore::new()),
            ledger.clone(),
            trust,
            bus.clone(),
            Duration::ZERO,
        ));
        l3.queue_l3_approval(L3Submission::new("src/auth/login.ts", RiskGrade::L3))
            .await
            .unwrap();
        let break_glass = Arc::new(BreakGlassProtocol::new(ledger, bus, GovernanceMode::Enforce));
        break_glass
            .activate(BreakGlassRequest::new("incident response drill", "alice", 10))
            .await
            .unwrap();
        break_glass.revoke("alice").await.unwrap();

        let nonces = Arc::new(NonceStore::new(Duration::ZERO));
        nonces.issue();
        nonces.issue();
        std::thread::sleep(Duration::from_millis(5));

        let sweeper = RetentionSweeper::new(nonces.clone())
            .with_break_glass(break_glass.clone())
            .with_l3(l3);
        let report = sweeper.sweep_now().await;
        assert_eq!(report.nonces_removed, 2);
        assert_eq!(report.overdue_l3, 1);
        assert_eq!(report.overrides_pruned, 0);
        assert!(nonces.is_empty());
        assert_eq!(break_glass.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_worker_starts_and_stops() {
        let mut sweeper =
            RetentionSweeper::new(Arc::new(NonceStore::default())).with_interval(Duration::from_secs(1));
        sweeper.start();
        assert!(sweeper.is_running());
        tokio::time::sleep(Duration::from_secs(3)).await;
        sweeper.stop().await;
        assert!(!sweeper.is_running());
    }
}

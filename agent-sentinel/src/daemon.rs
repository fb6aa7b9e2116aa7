//! Periodic worker draining the sentinel event queue.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agent_primitives::SentinelVerdict;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::arbiter::VerdictArbiter;
use crate::event::SentinelEvent;
use crate::queue::{Admission, PriorityEventQueue, QueueStats};
use crate::router::{RouteOutcome, VerdictRouter};

/// Default delay between queue ticks.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// A routed verdict.
#[derive(Debug, Clone)]
pub struct Processed {
    /// The verdict.
    pub verdict: SentinelVerdict,
    /// Where it went.
    pub outcome: RouteOutcome,
}

struct Pipeline {
    arbiter: Arc<VerdictArbiter>,
    router: Arc<VerdictRouter>,
    queue: Mutex<PriorityEventQueue>,
}

impl Pipeline {
    async fn process(&self, event: &SentinelEvent) -> Processed {
        let assessment = self.arbiter.assess(event).await;
        let outcome = self
            .router
            .route(&assessment.verdict, assessment.artifact_hash)
            .await;
        Processed {
            verdict: assessment.verdict,
            outcome,
        }
    }

    async fn tick(&self) -> Option<Processed> {
        // The lock is released before evaluation so submissions never wait on
        // the arbiter.
        let event = self.queue.lock().await.pop()?;
        debug!(path = %event.path, priority = ?event.priority, "processing queued event");
        Some(self.process(&event).await)
    }
}

/// Background sentinel: one event per tick, highest priority first.
pub struct SentinelDaemon {
    pipeline: Arc<Pipeline>,
    tick: Duration,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for SentinelDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelDaemon")
            .field("tick", &self.tick)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .field("worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl SentinelDaemon {
    /// Creates a stopped daemon with the default queue and tick.
    #[must_use]
    pub fn new(arbiter: Arc<VerdictArbiter>, router: Arc<VerdictRouter>) -> Self {
        Self::with_queue(arbiter, router, PriorityEventQueue::default())
    }

    /// Creates a stopped daemon over `queue`.
    #[must_use]
    pub fn with_queue(
        arbiter: Arc<VerdictArbiter>,
        router: Arc<VerdictRouter>,
        queue: PriorityEventQueue,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                arbiter,
                router,
                queue: Mutex::new(queue),
            }),
            tick: DEFAULT_TICK,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Overrides the tick interval.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Queues an event for the next ticks.
    pub async fn submit(&self, event: SentinelEvent) -> Admission {
        self.pipeline.queue.lock().await.push(event)
    }

    /// Processes at most one queued event immediately.
    pub async fn tick_once(&self) -> Option<Processed> {
        self.pipeline.tick().await
    }

    /// Evaluates and routes `event` without queueing it.
    ///
    /// The same file may also be waiting in the queue; both verdicts are kept.
    pub async fn audit_now(&self, event: &SentinelEvent) -> Processed {
        info!(path = %event.path, "manual audit");
        self.pipeline.process(event).await
    }

    /// Queue counters.
    pub async fn stats(&self) -> QueueStats {
        self.pipeline.queue.lock().await.stats()
    }

    /// Whether the background worker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Starts the background worker; does nothing when already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.shutdown.store(false, Ordering::Release);
        let pipeline = Arc::clone(&self.pipeline);
        let shutdown = Arc::clone(&self.shutdown);
        let tick = self.tick;
        self.worker = Some(tokio::spawn(run_tick_loop(pipeline, shutdown, tick)));
        info!(tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX), "sentinel started");
    }

    /// Signals the worker to stop after its current event and waits for it.
    pub async fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.await;
        }
        info!("sentinel stopped");
    }
}

impl Drop for SentinelDaemon {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
    }
}

async fn run_tick_loop(pipeline: Arc<Pipeline>, shutdown: Arc<AtomicBool>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !shutdown.load(Ordering::Acquire) {
        interval.tick().await;
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        pipeline.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use agent_config::InMemorySecretStore;
    use agent_ledger::Ledger;
    use agent_policy::{PolicyConfig, PolicyEngine};
    use agent_primitives::{ArbiterMode, LedgerEventType};
    use agent_telemetry::CollectingEventBus;

    use super::*;
    use crate::event::EventPriority;
    use crate::existence::ExistenceEngine;
    use crate::heuristic::HeuristicEngine;
    use crate::llm::LlmEvaluator;

    async fn daemon() -> (SentinelDaemon, Arc<Ledger>, PathBuf) {
        let root = std::env::temp_dir().join(format!("sentinel-daemon-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        let ledger = Arc::new(Ledger::in_memory(&InMemorySecretStore::new()).await.unwrap());
        let arbiter = Arc::new(VerdictArbiter::new(
            HeuristicEngine::default(),
            ExistenceEngine::new(&root),
            LlmEvaluator::unavailable("off"),
            Arc::new(PolicyEngine::new(PolicyConfig::default())),
            ArbiterMode::Heuristic,
        ));
        let router = Arc::new(VerdictRouter::new(CollectingEventBus::new(), ledger.clone()));
        (SentinelDaemon::new(arbiter, router), ledger, root)
    }

    #[tokio::test]
    async fn ticks_process_highest_priority_first() {
        let (daemon, ledger, root) = daemon().await;
        daemon
            .submit(SentinelEvent::new("docs/a.md").with_content("notes"))
            .await;
        daemon
            .submit(
                SentinelEvent::new("src/b.ts")
                    .with_content("eval(input)")
                    .with_priority(EventPriority::Critical),
            )
            .await;

        let first = daemon.tick_once().await.unwrap();
        assert_eq!(first.verdict.artifact_path(), "src/b.ts");
        let second = daemon.tick_once().await.unwrap();
        assert_eq!(second.verdict.artifact_path(), "docs/a.md");
        assert!(daemon.tick_once().await.is_none());

        let routed = ledger
            .get_entries_by_type(LedgerEventType::EvaluationRouted, 10)
            .unwrap();
        assert_eq!(routed.len(), 2);
        assert_eq!(daemon.stats().await.processed, 2);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn manual_audit_bypasses_queue() {
        let (daemon, _ledger, root) = daemon().await;
        let event = SentinelEvent::new("src/c.ts").with_content("const x = 1;");
        daemon.submit(event.clone()).await;

        let audited = daemon.audit_now(&event).await;
        assert_eq!(audited.verdict.artifact_path(), "src/c.ts");
        assert_eq!(daemon.stats().await.depth, 1);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(start_paused = true)]
    async fn background_worker_drains_queue() {
        let (mut daemon, ledger, root) = daemon().await;
        for i in 0..3 {
            daemon
                .submit(SentinelEvent::new(format!("docs/{i}.md")).with_content("text"))
                .await;
        }
        daemon.start();
        assert!(daemon.is_running());

        tokio::time::sleep(Duration::from_millis(450)).await;
        daemon.stop().await;

        assert!(!daemon.is_running());
        assert_eq!(daemon.stats().await.depth, 0);
        assert_eq!(ledger.entry_count().unwrap(), 3);
        let _ = std::fs::remove_dir_all(root);
    }
}

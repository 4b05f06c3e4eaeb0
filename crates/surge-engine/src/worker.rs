//! Virtual workers: sequential loops of prompt selection, request batches
//! and pacing sleeps.

use crate::client::CompletionTransport;
use crate::prompt::PromptSource;
use crate::stats::RunStats;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::ScenarioConfig;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Retiring = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Retiring,
            _ => Self::Stopped,
        }
    }

    /// Starting or Running.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// State shared between the controller and one worker task.
#[derive(Debug)]
pub struct WorkerCell {
    id: u64,
    state: AtomicU8,
    retire_at: Mutex<Option<Instant>>,
}

impl WorkerCell {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(WorkerState::Starting as u8),
            retire_at: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn retire_at(&self) -> Option<Instant> {
        *self.retire_at.lock()
    }

    /// Ask the worker to stop at its first iteration boundary after
    /// `deadline`. Retiring again only ever brings the deadline forward.
    pub fn retire(&self, deadline: Instant) {
        let moved = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match WorkerState::from_u8(current) {
                    WorkerState::Stopped => None,
                    _ => Some(WorkerState::Retiring as u8),
                }
            })
            .is_ok();

        if moved {
            let mut retire_at = self.retire_at.lock();
            *retire_at = Some(match *retire_at {
                Some(existing) => existing.min(deadline),
                None => deadline,
            });
        }
    }

    /// Retiring and past the deadline.
    pub fn should_stop(&self, now: Instant) -> bool {
        self.state() == WorkerState::Retiring
            && self.retire_at().map(|at| now >= at).unwrap_or(true)
    }

    /// Starting -> Running; a worker retired before its first poll stays Retiring.
    pub fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Starting as u8,
            WorkerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn mark_stopped(&self) {
        self.state.store(WorkerState::Stopped as u8, Ordering::Release);
    }
}

/// Per-iteration behavior, copied out of the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBehavior {
    pub multiplier: u32,
    pub replica_pacing: Duration,
    pub pacing_min: Duration,
    pub pacing_max: Duration,
}

impl WorkerBehavior {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            multiplier: config.amplification.multiplier.max(1),
            replica_pacing: config.amplification.replica_pacing,
            pacing_min: config.pacing.min,
            pacing_max: config.pacing.max,
        }
    }

    /// Think time drawn uniformly from `[pacing_min, pacing_max]`.
    pub fn draw_pacing(&self) -> Duration {
        if self.pacing_max <= self.pacing_min {
            return self.pacing_min;
        }
        rand::thread_rng().gen_range(self.pacing_min..=self.pacing_max)
    }
}

impl Default for WorkerBehavior {
    fn default() -> Self {
        Self {
            multiplier: 1,
            replica_pacing: Duration::from_millis(100),
            pacing_min: Duration::from_millis(500),
            pacing_max: Duration::from_secs(1),
        }
    }
}

/// Everything a worker task needs; cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    pub source: Arc<PromptSource>,
    pub transport: Arc<dyn CompletionTransport>,
    pub stats: Arc<RunStats>,
    pub behavior: WorkerBehavior,
}

/// One simulated user.
pub struct VirtualWorker {
    cell: Arc<WorkerCell>,
    ctx: WorkerContext,
}

impl VirtualWorker {
    pub fn new(cell: Arc<WorkerCell>, ctx: WorkerContext) -> Self {
        Self { cell, ctx }
    }

    /// Loop until retired. Retirement is only observed between iterations,
    /// so a batch in flight always runs to completion.
    pub async fn run(self) {
        self.cell.mark_running();
        let mut iterations = 0u64;

        while !self.cell.should_stop(Instant::now()) {
            self.run_iteration().await;
            iterations += 1;

            let pause = self.ctx.behavior.draw_pacing();
            tokio::time::sleep(pause).await;
        }

        self.cell.mark_stopped();
        debug!(worker = self.cell.id(), iterations, "Worker stopped");
    }

    /// One logical user action: a prompt sent `multiplier` times.
    /// Returns the number of requests issued.
    pub async fn run_iteration(&self) -> u32 {
        let prompt = self.ctx.source.pick().await;
        let behavior = self.ctx.behavior;

        for replica in 0..behavior.multiplier {
            if replica > 0 && !behavior.replica_pacing.is_zero() {
                tokio::time::sleep(behavior.replica_pacing).await;
            }

            let result = self.ctx.transport.complete(&prompt.text).await;
            if let Some(error) = &result.error {
                trace!(worker = self.cell.id(), replica, error = %error, "Request failed");
            }
            self.ctx.stats.record(&result, prompt.origin);
        }

        behavior.multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::RequestResult;
    use async_trait::async_trait;

    /// Transport that remembers every prompt it was given.
    #[derive(Default)]
    struct Recording {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionTransport for Recording {
        async fn complete(&self, prompt: &str) -> RequestResult {
            self.prompts.lock().push(prompt.to_string());
            RequestResult::from_response(
                200,
                br#"{"choices":[{"text":"ok"}]}"#,
                Duration::from_millis(40),
            )
        }
    }

    fn context(transport: Arc<Recording>, multiplier: u32) -> WorkerContext {
        WorkerContext {
            source: Arc::new(PromptSource::fixed(vec![
                "Which line goes to Heathrow?".to_string(),
                "Is the Victoria line running?".to_string(),
                "How late does the Central line run?".to_string(),
            ])),
            transport,
            stats: Arc::new(RunStats::new()),
            behavior: WorkerBehavior {
                multiplier,
                replica_pacing: Duration::from_millis(100),
                pacing_min: Duration::from_secs(1),
                pacing_max: Duration::from_secs(1),
            },
        }
    }

    #[test]
    fn test_retire_only_moves_deadline_forward() {
        let now = Instant::now();
        let cell = WorkerCell::new(7);
        assert_eq!(cell.state(), WorkerState::Starting);

        cell.retire(now + Duration::from_secs(20));
        assert_eq!(cell.state(), WorkerState::Retiring);
        assert!(!cell.should_stop(now));

        cell.retire(now + Duration::from_secs(30));
        assert_eq!(cell.retire_at(), Some(now + Duration::from_secs(20)));

        cell.retire(now);
        assert!(cell.should_stop(now));
    }

    #[test]
    fn test_retired_before_start_stays_retiring() {
        let cell = WorkerCell::new(0);
        cell.retire(Instant::now());
        cell.mark_running();
        assert_eq!(cell.state(), WorkerState::Retiring);
    }

    #[test]
    fn test_stopped_worker_cannot_be_retired() {
        let cell = WorkerCell::new(0);
        cell.mark_stopped();
        cell.retire(Instant::now());
        assert_eq!(cell.state(), WorkerState::Stopped);
        assert_eq!(cell.retire_at(), None);
    }

    #[test]
    fn test_pacing_within_bounds() {
        let behavior = WorkerBehavior::default();
        for _ in 0..200 {
            let pause = behavior.draw_pacing();
            assert!(pause >= Duration::from_millis(500));
            assert!(pause <= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_amplified_batch_sends_same_prompt() {
        let transport = Arc::new(Recording::default());
        let ctx = context(transport.clone(), 5);
        let stats = ctx.stats.clone();
        let worker = VirtualWorker::new(Arc::new(WorkerCell::new(0)), ctx);

        let start = Instant::now();
        let sent = worker.run_iteration().await;

        assert_eq!(sent, 5);
        let prompts = transport.prompts.lock().clone();
        assert_eq!(prompts.len(), 5);
        assert!(prompts.iter().all(|p| p == &prompts[0]));
        assert_eq!(stats.total(), 5);
        // Four gaps between five replicas
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unamplified_iteration_sends_once() {
        let transport = Arc::new(Recording::default());
        let worker = VirtualWorker::new(
            Arc::new(WorkerCell::new(0)),
            context(transport.clone(), 1),
        );

        assert_eq!(worker.run_iteration().await, 1);
        assert_eq!(transport.prompts.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stops_at_iteration_boundary() {
        let transport = Arc::new(Recording::default());
        let cell = Arc::new(WorkerCell::new(3));
        let worker = VirtualWorker::new(cell.clone(), context(transport.clone(), 1));

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(cell.state(), WorkerState::Running);

        cell.retire(Instant::now());
        handle.await.unwrap();

        assert_eq!(cell.state(), WorkerState::Stopped);
        // Iterations at 0s, 1s, 2s; the one in progress finished before stopping
        assert_eq!(transport.prompts.lock().len(), 3);
    }
}

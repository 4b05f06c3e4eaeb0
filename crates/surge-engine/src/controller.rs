//! Concurrency controller: reconciles the live worker count against the ramp
//! plan once per tick, then drains the roster when the schedule ends.

use crate::metrics::{ACTIVE_WORKERS, RETIRING_WORKERS};
use crate::worker::{VirtualWorker, WorkerCell, WorkerContext, WorkerState};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use surge_core::{RampPlan, ScenarioConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Progress published after every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub elapsed: Duration,
    pub desired: u32,
    pub live: usize,
    pub retiring: usize,
}

/// How the schedule went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerOutcome {
    /// Highest live worker count seen
    pub peak_workers: usize,
    /// Workers spawned over the whole run
    pub spawned: u64,
    /// Workers aborted after the graceful stop window
    pub interrupted: u64,
    /// Schedule ended early on a shutdown signal
    pub cancelled: bool,
    #[serde(with = "surge_core::duration::serde_humantime")]
    pub elapsed: Duration,
    #[serde(with = "surge_core::duration::serde_humantime")]
    pub drain_time: Duration,
}

/// Timing knobs for the controller loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub tick: Duration,
    pub graceful_stop: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            tick: config.ramp.tick,
            graceful_stop: config.ramp.graceful_stop,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            graceful_stop: Duration::from_secs(30),
        }
    }
}

struct WorkerSlot {
    cell: Arc<WorkerCell>,
    handle: JoinHandle<()>,
}

/// Drives the worker roster along a [`RampPlan`].
pub struct ConcurrencyController {
    plan: RampPlan,
    settings: ControllerSettings,
    ctx: WorkerContext,
    /// Spawn order, oldest first
    roster: Vec<WorkerSlot>,
    next_id: u64,
    peak_workers: usize,
    progress: watch::Sender<ControllerSnapshot>,
}

impl ConcurrencyController {
    pub fn new(plan: RampPlan, settings: ControllerSettings, ctx: WorkerContext) -> Self {
        let (progress, _) = watch::channel(ControllerSnapshot::default());
        Self {
            plan,
            settings,
            ctx,
            roster: Vec::new(),
            next_id: 0,
            peak_workers: 0,
            progress,
        }
    }

    /// Receiver for per-tick progress snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.progress.subscribe()
    }

    pub fn plan(&self) -> &RampPlan {
        &self.plan
    }

    /// Workers in Starting or Running.
    pub fn live(&self) -> usize {
        self.roster
            .iter()
            .filter(|slot| slot.cell.state().is_live())
            .count()
    }

    pub fn retiring(&self) -> usize {
        self.roster
            .iter()
            .filter(|slot| slot.cell.state() == WorkerState::Retiring)
            .count()
    }

    /// `(id, state, retire deadline)` for every worker still on the roster.
    pub fn roster_states(&self) -> Vec<(u64, WorkerState, Option<Instant>)> {
        self.roster
            .iter()
            .map(|slot| (slot.cell.id(), slot.cell.state(), slot.cell.retire_at()))
            .collect()
    }

    /// Bring the live count to `desired`: spawn the shortfall, or retire the
    /// surplus oldest-first with deadlines spread over the ramp-down window.
    pub fn reconcile(&mut self, desired: u32, now: Instant) {
        self.reap();

        let desired = desired as usize;
        let live = self.live();

        if desired > live {
            for _ in live..desired {
                self.spawn_worker();
            }
        } else if desired < live {
            let surplus = live - desired;
            let grace = self.plan.graceful_ramp_down();

            let victims = self
                .roster
                .iter()
                .filter(|slot| slot.cell.state().is_live())
                .take(surplus);

            for (i, slot) in victims.enumerate() {
                let deadline = now + grace * (i as u32 + 1) / surplus as u32;
                slot.cell.retire(deadline);
                debug!(
                    worker = slot.cell.id(),
                    stop_in = ?deadline.saturating_duration_since(now),
                    "Retiring worker"
                );
            }
        }

        self.peak_workers = self.peak_workers.max(self.live());
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let cell = Arc::new(WorkerCell::new(id));
        let worker = VirtualWorker::new(Arc::clone(&cell), self.ctx.clone());
        let handle = tokio::spawn(worker.run());

        debug!(worker = id, "Spawned worker");
        self.roster.push(WorkerSlot { cell, handle });
    }

    /// Drop stopped workers from the roster.
    fn reap(&mut self) {
        self.roster
            .retain(|slot| slot.cell.state() != WorkerState::Stopped || !slot.handle.is_finished());
    }

    fn publish(&self, elapsed: Duration, desired: u32) {
        let live = self.live();
        let retiring = self.retiring();

        ACTIVE_WORKERS.set(live as i64);
        RETIRING_WORKERS.set(retiring as i64);

        self.progress.send_replace(ControllerSnapshot {
            elapsed,
            desired,
            live,
            retiring,
        });
    }

    /// Follow the plan until it ends or `shutdown` resolves, then drain.
    pub async fn run<F>(mut self, shutdown: F) -> ControllerOutcome
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let end = start + self.plan.total_duration();

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            plan = %self.plan.description(),
            total = ?self.plan.total_duration(),
            "Starting ramp"
        );

        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if now >= end {
                        break;
                    }
                    let elapsed = now.duration_since(start);
                    let desired = self.plan.desired_at(elapsed);
                    self.reconcile(desired, now);
                    self.publish(elapsed, desired);
                }
                _ = tokio::time::sleep_until(end) => break,
                _ = &mut shutdown => {
                    info!("Shutdown requested, ending schedule early");
                    cancelled = true;
                    break;
                }
            }
        }

        let elapsed = start.elapsed();
        let (interrupted, drain_time) = self.drain().await;
        self.publish(elapsed, 0);

        info!(
            elapsed = ?elapsed,
            spawned = self.next_id,
            peak = self.peak_workers,
            interrupted,
            "Ramp finished"
        );

        ControllerOutcome {
            peak_workers: self.peak_workers,
            spawned: self.next_id,
            interrupted,
            cancelled,
            elapsed,
            drain_time,
        }
    }

    /// Retire everyone now and wait up to `graceful_stop`; abort the rest.
    /// Returns the number of aborted workers and the time spent waiting.
    pub async fn drain(&mut self) -> (u64, Duration) {
        let now = Instant::now();
        let deadline = now + self.settings.graceful_stop;

        for slot in &self.roster {
            slot.cell.retire(now);
        }

        let mut interrupted = 0;
        for slot in self.roster.iter_mut() {
            if tokio::time::timeout_at(deadline, &mut slot.handle)
                .await
                .is_err()
            {
                slot.handle.abort();
                slot.cell.mark_stopped();
                interrupted += 1;
            }
        }

        if interrupted > 0 {
            warn!(
                interrupted,
                graceful_stop = ?self.settings.graceful_stop,
                "Workers still busy after graceful stop were interrupted"
            );
        }

        self.roster.clear();
        (interrupted, now.elapsed())
    }
}

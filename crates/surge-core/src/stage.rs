//! Ramp stages and the concurrency schedule they describe.

use crate::duration::serde_humantime;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One ramp segment: over `duration`, move concurrency linearly from the
/// previous boundary to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Length of this segment
    #[serde(with = "serde_humantime")]
    pub duration: Duration,

    /// Concurrency reached at the end of this segment
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Immutable, validated schedule of stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RampPlan {
    start_target: u32,
    stages: Vec<Stage>,
    graceful_ramp_down: Duration,
}

/// A stage boundary as seen on the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// Elapsed time at which the stage ends
    pub at: Duration,
    /// Concurrency reached at that instant
    pub target: u32,
}

impl RampPlan {
    /// Build a plan, rejecting empty schedules and zero-length stages.
    pub fn new(
        start_target: u32,
        stages: Vec<Stage>,
        graceful_ramp_down: Duration,
    ) -> ConfigResult<Self> {
        if stages.is_empty() {
            return Err(ConfigError::validation("ramp.stages cannot be empty"));
        }

        if let Some(idx) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::validation(format!(
                "ramp.stages[{}].duration must be > 0",
                idx
            )));
        }

        Ok(Self {
            start_target,
            stages,
            graceful_ramp_down,
        })
    }

    pub fn start_target(&self) -> u32 {
        self.start_target
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn graceful_ramp_down(&self) -> Duration {
        self.graceful_ramp_down
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest concurrency the schedule ever asks for.
    pub fn peak_target(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start_target))
            .max()
            .unwrap_or(0)
    }

    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage whose `[start, end)` interval contains `elapsed`.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;
        for (idx, stage) in self.stages.iter().enumerate() {
            stage_end += stage.duration;
            if elapsed < stage_end {
                return Some(idx);
            }
        }
        None
    }

    /// Instantaneous target concurrency, linearly interpolated within the
    /// active stage. Zero once the schedule has ended.
    pub fn target_at(&self, elapsed: Duration) -> f64 {
        let mut from = self.start_target as f64;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let to = stage.target as f64;
                return from + (to - from) * progress;
            }
            from = stage.target as f64;
            stage_start = stage_end;
        }

        0.0
    }

    /// Whole number of workers the controller should keep live at `elapsed`.
    pub fn desired_at(&self, elapsed: Duration) -> u32 {
        self.target_at(elapsed).round() as u32
    }

    /// Stage end instants with their targets, in order.
    pub fn boundaries(&self) -> Vec<Boundary> {
        let mut at = Duration::ZERO;
        self.stages
            .iter()
            .map(|stage| {
                at += stage.duration;
                Boundary {
                    at,
                    target: stage.target,
                }
            })
            .collect()
    }

    pub fn description(&self) -> String {
        let peak = self.peak_target();
        format!(
            "{} stages over {}, peak {} workers",
            self.stages.len(),
            crate::duration::format_duration(self.total_duration()),
            peak
        )
    }
}

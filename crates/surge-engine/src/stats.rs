//! Streaming aggregates shared by all workers.
//!
//! Counters are plain atomics. Latency percentiles come from a fixed-size
//! uniform reservoir (Algorithm R), so memory stays bounded however long the
//! run lasts; below the reservoir capacity the percentiles are exact.

use crate::checker::{PromptOrigin, RequestResult, StatusClass};
use crate::metrics::{REQUESTS_TOTAL, REQUEST_DURATION};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use surge_core::{Aggregation, MetricSource};

/// Default number of latency samples retained for percentiles.
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 10_000;

#[derive(Debug)]
struct Reservoir {
    capacity: usize,
    seen: u64,
    samples_us: Vec<u64>,
}

impl Reservoir {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: 0,
            samples_us: Vec::with_capacity(capacity.min(1024)),
        }
    }

    fn offer(&mut self, value_us: u64) {
        self.seen += 1;
        if self.samples_us.len() < self.capacity {
            self.samples_us.push(value_us);
            return;
        }
        let slot = rand::thread_rng().gen_range(0..self.seen);
        if let Some(existing) = self.samples_us.get_mut(slot as usize) {
            *existing = value_us;
        }
    }
}

/// Concurrently updated run aggregates.
#[derive(Debug)]
pub struct RunStats {
    total: AtomicU64,
    failed: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    status_other: AtomicU64,
    transport_errors: AtomicU64,
    audience_prompts: AtomicU64,
    default_prompts: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
    reservoir: Mutex<Reservoir>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RESERVOIR_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            status_2xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            status_other: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            audience_prompts: AtomicU64::new(0),
            default_prompts: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_min_us: AtomicU64::new(u64::MAX),
            latency_max_us: AtomicU64::new(0),
            reservoir: Mutex::new(Reservoir::new(capacity.max(1))),
        }
    }

    /// Fold one result into the aggregates.
    pub fn record(&self, result: &RequestResult, origin: PromptOrigin) {
        let success = result.is_success();
        let latency_us = result.latency.as_micros().min(u64::MAX as u128) as u64;

        self.total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let bucket = match result.status_class() {
            StatusClass::Success => &self.status_2xx,
            StatusClass::ClientError => &self.status_4xx,
            StatusClass::ServerError => &self.status_5xx,
            StatusClass::Other => &self.status_other,
            StatusClass::Transport => &self.transport_errors,
        };
        bucket.fetch_add(1, Ordering::Relaxed);

        match origin {
            PromptOrigin::Audience => &self.audience_prompts,
            PromptOrigin::Default => &self.default_prompts,
        }
        .fetch_add(1, Ordering::Relaxed);

        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_min_us.fetch_min(latency_us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(latency_us, Ordering::Relaxed);
        self.reservoir.lock().offer(latency_us);

        REQUESTS_TOTAL
            .with_label_values(&[if success { "success" } else { "failure" }, origin.as_str()])
            .inc();
        REQUEST_DURATION.observe(result.latency.as_secs_f64());
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy with the reservoir sorted for percentile queries.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut samples_us = self.reservoir.lock().samples_us.clone();
        samples_us.sort_unstable();

        let total = self.total();
        let min = self.latency_min_us.load(Ordering::Relaxed);

        StatsSnapshot {
            total_requests: total,
            failed_requests: self.failed(),
            status_2xx: self.status_2xx.load(Ordering::Relaxed),
            status_4xx: self.status_4xx.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
            status_other: self.status_other.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            audience_prompts: self.audience_prompts.load(Ordering::Relaxed),
            default_prompts: self.default_prompts.load(Ordering::Relaxed),
            latency_sum_us: self.latency_sum_us.load(Ordering::Relaxed),
            latency_min_us: if total == 0 { 0 } else { min },
            latency_max_us: self.latency_max_us.load(Ordering::Relaxed),
            samples_us,
        }
    }
}

/// Immutable aggregates at one instant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub status_other: u64,
    pub transport_errors: u64,
    pub audience_prompts: u64,
    pub default_prompts: u64,
    pub latency_sum_us: u64,
    pub latency_min_us: u64,
    pub latency_max_us: u64,
    /// Sorted reservoir samples in microseconds
    #[serde(skip)]
    pub samples_us: Vec<u64>,
}

impl StatsSnapshot {
    pub fn successful_requests(&self) -> u64 {
        self.total_requests - self.failed_requests
    }

    /// Calculate error rate (0.0-1.0)
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    /// Calculate throughput (requests per second) over `elapsed`
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        if elapsed.as_secs_f64() == 0.0 {
            return 0.0;
        }
        self.total_requests as f64 / elapsed.as_secs_f64()
    }

    pub fn avg_latency(&self) -> Option<Duration> {
        if self.total_requests == 0 {
            return None;
        }
        Some(Duration::from_micros(
            self.latency_sum_us / self.total_requests,
        ))
    }

    pub fn min_latency(&self) -> Option<Duration> {
        (self.total_requests > 0).then(|| Duration::from_micros(self.latency_min_us))
    }

    pub fn max_latency(&self) -> Option<Duration> {
        (self.total_requests > 0).then(|| Duration::from_micros(self.latency_max_us))
    }

    pub fn p50_latency(&self) -> Option<Duration> {
        self.percentile(0.50)
    }

    pub fn p90_latency(&self) -> Option<Duration> {
        self.percentile(0.90)
    }

    pub fn p95_latency(&self) -> Option<Duration> {
        self.percentile(0.95)
    }

    pub fn p99_latency(&self) -> Option<Duration> {
        self.percentile(0.99)
    }

    /// Calculate latency percentile (`p` in 0.0-1.0)
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.samples_us.is_empty() {
            return None;
        }

        let index = ((self.samples_us.len() as f64) * p) as usize;
        let index = index.min(self.samples_us.len() - 1);

        Some(Duration::from_micros(self.samples_us[index]))
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl MetricSource for StatsSnapshot {
    fn latency_ms(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Percentile(p) => self.percentile(p / 100.0).map(as_ms),
            Aggregation::Med => self.p50_latency().map(as_ms),
            Aggregation::Avg => self.avg_latency().map(as_ms),
            Aggregation::Min => self.min_latency().map(as_ms),
            Aggregation::Max => self.max_latency().map(as_ms),
            Aggregation::Rate => None,
        }
    }

    fn failure_rate(&self) -> f64 {
        self.error_rate()
    }
}

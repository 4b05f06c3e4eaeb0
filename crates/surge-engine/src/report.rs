//! End-of-run summary and report files.

use crate::controller::ControllerOutcome;
use crate::error::{EngineError, EngineResult};
use crate::stats::StatsSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use surge_core::duration::format_duration;
use surge_core::{Evaluation, MetricName};

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format `{}` (markdown, json)", other)),
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    #[serde(with = "surge_core::duration::serde_humantime")]
    pub duration: Duration,
    pub stats: StatsSnapshot,
    pub evaluation: Evaluation,
    pub outcome: ControllerOutcome,
}

fn ms(latency: Option<Duration>) -> String {
    match latency {
        Some(d) => format!("{:.2}ms", d.as_secs_f64() * 1000.0),
        None => "-".to_string(),
    }
}

impl RunSummary {
    /// All thresholds held.
    pub fn passed(&self) -> bool {
        self.evaluation.passed()
    }

    /// One line per breached threshold.
    pub fn failure_summary(&self) -> String {
        let failures: Vec<String> = self
            .evaluation
            .failures()
            .map(|verdict| match verdict.observed {
                Some(observed) => format!(
                    "{} breached: observed {:.4}",
                    verdict.threshold, observed
                ),
                None => format!("{} breached: no samples", verdict.threshold),
            })
            .collect();

        if failures.is_empty() {
            return "All thresholds passed".to_string();
        }
        failures.join("\n")
    }

    /// Plain-text summary printed to stdout at the end of `surge run`.
    pub fn render_text(&self) -> String {
        let s = &self.stats;
        let mut out = String::new();

        let _ = writeln!(out, "Scenario:      {}", self.scenario);
        let _ = writeln!(out, "Target:        {}", self.target);
        let _ = writeln!(out, "Duration:      {}", format_duration(self.duration));
        let _ = writeln!(
            out,
            "Workers:       peak {}, spawned {}, interrupted {}{}",
            self.outcome.peak_workers,
            self.outcome.spawned,
            self.outcome.interrupted,
            if self.outcome.cancelled { " (cancelled)" } else { "" }
        );
        let _ = writeln!(
            out,
            "Requests:      {} total, {} ok, {} failed ({:.2}% failure rate)",
            s.total_requests,
            s.successful_requests(),
            s.failed_requests,
            s.error_rate() * 100.0
        );
        let _ = writeln!(
            out,
            "Statuses:      2xx {}, 4xx {}, 5xx {}, other {}, transport {}",
            s.status_2xx, s.status_4xx, s.status_5xx, s.status_other, s.transport_errors
        );
        let _ = writeln!(
            out,
            "Prompts:       {} audience, {} default",
            s.audience_prompts, s.default_prompts
        );
        let _ = writeln!(
            out,
            "Latency:       avg {}, p50 {}, p90 {}, p95 {}, p99 {}, max {}",
            ms(s.avg_latency()),
            ms(s.p50_latency()),
            ms(s.p90_latency()),
            ms(s.p95_latency()),
            ms(s.p99_latency()),
            ms(s.max_latency())
        );
        let _ = writeln!(
            out,
            "Throughput:    {:.2} req/s",
            s.throughput(self.duration)
        );

        if !self.evaluation.verdicts.is_empty() {
            let _ = writeln!(out, "Thresholds:");
            for verdict in &self.evaluation.verdicts {
                let observed = verdict
                    .observed
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "n/a".to_string());
                let _ = writeln!(
                    out,
                    "  {} {} (observed {})",
                    if verdict.passed { "PASS" } else { "FAIL" },
                    verdict.threshold,
                    observed
                );
            }
        }

        out
    }

    /// Write report to file
    pub fn write_report(&self, path: impl AsRef<Path>, format: ReportFormat) -> EngineResult<()> {
        let path = path.as_ref();
        let content = match format {
            ReportFormat::Markdown => self.generate_markdown(),
            ReportFormat::Json => self.generate_json()?,
        };

        std::fs::write(path, content).map_err(|e| EngineError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn generate_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Generate Markdown report
    fn generate_markdown(&self) -> String {
        let s = &self.stats;
        let status = if self.passed() { "PASS" } else { "FAIL" };

        let mut thresholds = String::new();
        if self.evaluation.verdicts.is_empty() {
            thresholds.push_str("No thresholds configured.\n");
        } else {
            thresholds.push_str("| Metric | Threshold | Observed | Status |\n");
            thresholds.push_str("|--------|-----------|----------|--------|\n");
            for verdict in &self.evaluation.verdicts {
                let observed = match (verdict.observed, verdict.threshold.metric) {
                    (None, _) => "n/a".to_string(),
                    (Some(v), MetricName::HttpReqDuration) => format!("{:.2}ms", v),
                    (Some(v), MetricName::HttpReqFailed) => format!("{:.4}", v),
                };
                let _ = writeln!(
                    thresholds,
                    "| {} | {} | {} | {} |",
                    verdict.threshold.metric,
                    verdict.threshold.expr,
                    observed,
                    if verdict.passed { "PASS" } else { "FAIL" }
                );
            }
        }

        format!(
            r#"# Load Run Report: {}

**Status**: {}
**Target**: {}
**Started**: {}

---

## Summary

- **Duration**: {}
- **Peak Workers**: {}
- **Workers Spawned**: {}
- **Interrupted Workers**: {}
- **Total Requests**: {}
- **Successful**: {}
- **Failed**: {}
- **Failure Rate**: {:.4}%

---

## Latency

| Aggregation | Latency |
|-------------|---------|
| Avg | {} |
| Min | {} |
| P50 | {} |
| P90 | {} |
| P95 | {} |
| P99 | {} |
| Max | {} |

---

## Responses

| Class | Count |
|-------|-------|
| 2xx | {} |
| 4xx | {} |
| 5xx | {} |
| Other | {} |
| Transport error | {} |

Prompts: {} audience, {} default.

---

## Thresholds

{}"#,
            self.scenario,
            status,
            self.target,
            self.started_at.to_rfc3339(),
            format_duration(self.duration),
            self.outcome.peak_workers,
            self.outcome.spawned,
            self.outcome.interrupted,
            s.total_requests,
            s.successful_requests(),
            s.failed_requests,
            s.error_rate() * 100.0,
            ms(s.avg_latency()),
            ms(s.min_latency()),
            ms(s.p50_latency()),
            ms(s.p90_latency()),
            ms(s.p95_latency()),
            ms(s.p99_latency()),
            ms(s.max_latency()),
            s.status_2xx,
            s.status_4xx,
            s.status_5xx,
            s.status_other,
            s.transport_errors,
            s.audience_prompts,
            s.default_prompts,
            thresholds,
        )
    }
}

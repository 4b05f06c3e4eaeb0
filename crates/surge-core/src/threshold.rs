//! Pass/fail ceilings evaluated once a run has finished.
//!
//! Thresholds use the k6 expression syntax, one expression per string:
//!
//! ```text
//! http_req_duration = ["p(95)<30000", "avg<=5000"]   # milliseconds
//! http_req_failed   = ["rate<0.3"]                   # failures / total
//! ```
//!
//! `<` and `>` are exclusive, `<=` and `>=` inclusive. A failure rate of
//! exactly `0.15` breaches `rate<0.15` but satisfies `rate<=0.15`.
//!
//! Verdicts are reporting only; nothing here feeds back into the schedule.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metric a threshold is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    /// Request latency in milliseconds
    HttpReqDuration,
    /// Fraction of requests classified as failed
    HttpReqFailed,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpReqDuration => "http_req_duration",
            Self::HttpReqFailed => "http_req_failed",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation applied to a metric before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// `p(N)`, N in (0, 100]
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Rate,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentile(p) => write!(f, "p({})", p),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Rate => f.write_str("rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Self::Lt => observed < limit,
            Self::Le => observed <= limit,
            Self::Gt => observed > limit,
            Self::Ge => observed >= limit,
            Self::Eq => observed == limit,
            Self::Ne => observed != limit,
        }
    }
}

/// A parsed `aggregation op limit` expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub limit: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.symbol(),
            self.limit
        )
    }
}

impl FromStr for ThresholdExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Two-character operators first so `<=` is not read as `<`.
        const OPERATORS: [(&str, Comparison); 6] = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];

        let (pos, op, comparison) = OPERATORS
            .iter()
            .filter_map(|(op, cmp)| s.find(op).map(|pos| (pos, *op, *cmp)))
            .min_by_key(|(pos, op, _)| (*pos, std::cmp::Reverse(op.len())))
            .ok_or_else(|| "missing comparison operator".to_string())?;

        let lhs = s[..pos].trim();
        let rhs = s[pos + op.len()..].trim();

        let aggregation = parse_aggregation(lhs)?;
        let limit: f64 = rhs
            .parse()
            .map_err(|_| format!("limit `{}` is not a number", rhs))?;
        if !limit.is_finite() {
            return Err(format!("limit `{}` must be finite", rhs));
        }

        Ok(Self {
            aggregation,
            comparison,
            limit,
        })
    }
}

fn parse_aggregation(lhs: &str) -> Result<Aggregation, String> {
    match lhs {
        "avg" => return Ok(Aggregation::Avg),
        "min" => return Ok(Aggregation::Min),
        "max" => return Ok(Aggregation::Max),
        "med" => return Ok(Aggregation::Med),
        "rate" => return Ok(Aggregation::Rate),
        _ => {}
    }

    let inner = lhs
        .strip_prefix("p(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| format!("unknown aggregation `{}`", lhs))?;
    let percentile: f64 = inner
        .trim()
        .parse()
        .map_err(|_| format!("percentile `{}` is not a number", inner))?;
    if !(percentile > 0.0 && percentile <= 100.0) {
        return Err(format!("percentile {} must be in (0, 100]", percentile));
    }
    Ok(Aggregation::Percentile(percentile))
}

/// An expression bound to the metric it judges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: MetricName,
    pub expr: ThresholdExpr,
}

impl Threshold {
    /// Parse and check that the aggregation makes sense for the metric.
    pub fn parse(metric: MetricName, expression: &str) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::InvalidThreshold {
            metric: metric.to_string(),
            expression: expression.to_string(),
            reason,
        };

        let expr: ThresholdExpr = expression.parse().map_err(invalid)?;

        let compatible = match metric {
            MetricName::HttpReqDuration => expr.aggregation != Aggregation::Rate,
            MetricName::HttpReqFailed => expr.aggregation == Aggregation::Rate,
        };
        if !compatible {
            return Err(invalid(format!(
                "aggregation `{}` does not apply to {}",
                expr.aggregation, metric
            )));
        }

        Ok(Self { metric, expr })
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expr)
    }
}

/// Aggregate values a threshold can be checked against.
pub trait MetricSource {
    /// Latency aggregation in milliseconds, `None` when nothing was recorded.
    fn latency_ms(&self, aggregation: Aggregation) -> Option<f64>;

    /// Failed requests divided by total requests (0.0 when idle).
    fn failure_rate(&self) -> f64;
}

/// Outcome of one threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdVerdict {
    pub threshold: Threshold,
    /// Observed value; `None` when the metric had no samples.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// All verdicts of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdicts: Vec<ThresholdVerdict>,
}

impl Evaluation {
    pub fn passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdVerdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }
}

/// Compiled thresholds of a scenario.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSet {
    thresholds: Vec<Threshold>,
}

impl ThresholdSet {
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        Self { thresholds }
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    /// Judge every threshold. A latency threshold with no samples fails.
    pub fn evaluate(&self, source: &impl MetricSource) -> Evaluation {
        let verdicts = self
            .thresholds
            .iter()
            .map(|threshold| {
                let observed = match threshold.metric {
                    MetricName::HttpReqDuration => {
                        source.latency_ms(threshold.expr.aggregation)
                    }
                    MetricName::HttpReqFailed => Some(source.failure_rate()),
                };
                let passed = observed
                    .map(|value| threshold.expr.comparison.holds(value, threshold.expr.limit))
                    .unwrap_or(false);

                ThresholdVerdict {
                    threshold: threshold.clone(),
                    observed,
                    passed,
                }
            })
            .collect();

        Evaluation { verdicts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        p95_ms: Option<f64>,
        failure_rate: f64,
    }

    impl MetricSource for Fixed {
        fn latency_ms(&self, aggregation: Aggregation) -> Option<f64> {
            match aggregation {
                Aggregation::Percentile(p) if p == 95.0 => self.p95_ms,
                _ => self.p95_ms.map(|v| v / 2.0),
            }
        }

        fn failure_rate(&self) -> f64 {
            self.failure_rate
        }
    }

    fn set(duration: &[&str], failed: &[&str]) -> ThresholdSet {
        let mut thresholds = Vec::new();
        for expr in duration {
            thresholds.push(Threshold::parse(MetricName::HttpReqDuration, expr).unwrap());
        }
        for expr in failed {
            thresholds.push(Threshold::parse(MetricName::HttpReqFailed, expr).unwrap());
        }
        ThresholdSet::new(thresholds)
    }

    #[test]
    fn test_parse_k6_expressions() {
        let expr: ThresholdExpr = "p(95)<30000".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(expr.comparison, Comparison::Lt);
        assert_eq!(expr.limit, 30000.0);

        let expr: ThresholdExpr = " rate <= 0.3 ".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Rate);
        assert_eq!(expr.comparison, Comparison::Le);

        let expr: ThresholdExpr = "p(99.9)>=1".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(expr.comparison, Comparison::Ge);
    }

    #[test]
    fn test_parse_errors() {
        assert!("p(95)".parse::<ThresholdExpr>().is_err());
        assert!("p(0)<1".parse::<ThresholdExpr>().is_err());
        assert!("p(101)<1".parse::<ThresholdExpr>().is_err());
        assert!("mean<1".parse::<ThresholdExpr>().is_err());
        assert!("avg<fast".parse::<ThresholdExpr>().is_err());
    }

    #[test]
    fn test_aggregation_must_match_metric() {
        assert!(Threshold::parse(MetricName::HttpReqDuration, "rate<0.1").is_err());
        assert!(Threshold::parse(MetricName::HttpReqFailed, "p(95)<100").is_err());

        let err = Threshold::parse(MetricName::HttpReqFailed, "avg<1").unwrap_err();
        assert!(err.to_string().contains("http_req_failed"));
    }

    #[test]
    fn test_failure_rate_boundary_exclusive() {
        // 85 of 100 succeeded, p95 = 1200ms
        let source = Fixed {
            p95_ms: Some(1200.0),
            failure_rate: 0.15,
        };

        let evaluation = set(&["p(95)<20000"], &["rate<0.15"]).evaluate(&source);
        assert!(evaluation.verdicts[0].passed);
        assert!(!evaluation.verdicts[1].passed);
        assert!(!evaluation.passed());
        assert_eq!(evaluation.failures().count(), 1);
    }

    #[test]
    fn test_failure_rate_boundary_inclusive() {
        let source = Fixed {
            p95_ms: Some(1200.0),
            failure_rate: 0.15,
        };

        let evaluation = set(&["p(95)<20000"], &["rate<=0.15"]).evaluate(&source);
        assert!(evaluation.passed());
        assert_eq!(evaluation.verdicts[1].observed, Some(0.15));
    }

    #[test]
    fn test_latency_without_samples_fails() {
        let source = Fixed {
            p95_ms: None,
            failure_rate: 0.0,
        };

        let evaluation = set(&["p(95)<20000"], &["rate<0.3"]).evaluate(&source);
        assert!(!evaluation.verdicts[0].passed);
        assert_eq!(evaluation.verdicts[0].observed, None);
        assert!(evaluation.verdicts[1].passed);
    }

    #[test]
    fn test_empty_set_passes() {
        let source = Fixed {
            p95_ms: None,
            failure_rate: 1.0,
        };
        assert!(ThresholdSet::default().evaluate(&source).passed());
    }

    #[test]
    fn test_display() {
        let threshold = Threshold::parse(MetricName::HttpReqDuration, "p(95)<30000").unwrap();
        assert_eq!(threshold.to_string(), "http_req_duration: p(95)<30000");
    }
}

//! Domain types for staged load generation: ramp schedules, scenario
//! configuration, thresholds and built-in presets.

pub mod duration;
pub mod error;
pub mod preset;
pub mod scenario;
pub mod stage;
pub mod threshold;

pub use error::{ConfigError, ConfigResult};
pub use preset::Preset;
pub use scenario::{
    AmplificationConfig, ApiKind, LoggingConfig, PacingConfig, PromptConfig, RampConfig,
    ScenarioConfig, TargetConfig, ThresholdConfig, DEFAULT_QUESTIONS,
};
pub use stage::{Boundary, RampPlan, Stage};
pub use threshold::{
    Aggregation, Comparison, Evaluation, MetricName, MetricSource, Threshold, ThresholdExpr,
    ThresholdSet, ThresholdVerdict,
};

//! Scenario configuration.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Command-line flags (applied by the caller, highest priority)
//! 2. Environment variables
//! 3. TOML scenario file or built-in preset
//! 4. Default values (lowest priority)

use crate::duration::{parse_duration, serde_humantime};
use crate::error::{ConfigError, ConfigResult};
use crate::stage::{RampPlan, Stage};
use crate::threshold::{MetricName, Threshold, ThresholdSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Questions served when the audience has not submitted any yet.
pub const DEFAULT_QUESTIONS: &[&str] = &[
    "How many lines does the London Underground have?",
    "What is the oldest line on the Tube?",
    "How many stations are on the Central Line?",
    "Which line is the Circle Line?",
    "What year did the Tube open?",
    "Which station is the deepest?",
    "How many passengers use the Tube daily?",
    "What color is the Piccadilly Line?",
    "Which line goes to Heathrow?",
    "What is the shortest line on the Tube?",
];

/// Environment variables naming the target base URL, checked in order.
pub const TARGET_URL_VARS: [&str; 3] = ["API_URL", "VLLM_URL", "FRONTEND_URL"];

/// A complete, declarative description of one load run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Scenario name used in logs and reports
    #[serde(default = "default_name")]
    pub name: String,

    /// Inference endpoint under load
    #[serde(default)]
    pub target: TargetConfig,

    /// Stage schedule and worker drain windows
    #[serde(default)]
    pub ramp: RampConfig,

    /// Per-worker sleep between iterations
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Fan-out of one prompt into several requests
    #[serde(default)]
    pub amplification: AmplificationConfig,

    /// Where prompts come from
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Pass/fail ceilings judged at run end
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which OpenAI-compatible route to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    /// `POST /v1/completions` with a `prompt` field
    Completions,
    /// `POST /v1/chat/completions` with a single user message
    Chat,
}

impl ApiKind {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Completions => "/v1/completions",
            Self::Chat => "/v1/chat/completions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the inference endpoint (default: "http://localhost:8000")
    #[serde(default = "default_target_url")]
    pub url: String,

    /// Route flavour (default: completions)
    #[serde(default = "default_api")]
    pub api: ApiKind,

    /// Model identifier sent in every request
    #[serde(default = "default_model")]
    pub model: String,

    /// `max_tokens` request field (default: 50)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// `temperature` request field (default: 0.7)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request deadline (default: 60s)
    #[serde(default = "default_request_timeout", with = "serde_humantime")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampConfig {
    /// Concurrency at t = 0 (default: 0)
    #[serde(default)]
    pub start_target: u32,

    /// Ordered ramp segments
    #[serde(default)]
    pub stages: Vec<Stage>,

    /// Window over which surplus workers are retired (default: 30s)
    #[serde(default = "default_graceful_window", with = "serde_humantime")]
    pub graceful_ramp_down: Duration,

    /// Maximum wait for workers once the schedule ends (default: 30s)
    #[serde(default = "default_graceful_window", with = "serde_humantime")]
    pub graceful_stop: Duration,

    /// Reconciliation interval (default: 1s)
    #[serde(default = "default_tick", with = "serde_humantime")]
    pub tick: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Lower bound of the uniform pacing draw (default: 500ms)
    #[serde(default = "default_pacing_min", with = "serde_humantime")]
    pub min: Duration,

    /// Upper bound of the uniform pacing draw (default: 1s)
    #[serde(default = "default_pacing_max", with = "serde_humantime")]
    pub max: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplificationConfig {
    /// Physical requests per selected prompt (default: 1, no amplification)
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    /// Sleep between replicas of one batch (default: 100ms)
    #[serde(default = "default_replica_pacing", with = "serde_humantime")]
    pub replica_pacing: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Base URL serving `GET /api/questions`; static defaults only when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Minimum time between successful refreshes (default: 10s)
    #[serde(default = "default_refresh_interval", with = "serde_humantime")]
    pub refresh_interval: Duration,

    /// Fallback prompts; the built-in Tube questions when empty
    #[serde(default)]
    pub defaults: Vec<String>,
}

/// Raw k6-style threshold expressions, compiled by [`ThresholdConfig::compile`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub http_req_duration: Vec<String>,

    #[serde(default)]
    pub http_req_failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty (default: "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_name() -> String {
    "custom".to_string()
}

fn default_target_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_api() -> ApiKind {
    ApiKind::Completions
}

fn default_model() -> String {
    "TheBloke/Mistral-7B-Instruct-v0.2-AWQ".to_string()
}

fn default_max_tokens() -> u32 {
    50
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_graceful_window() -> Duration {
    Duration::from_secs(30)
}

fn default_tick() -> Duration {
    Duration::from_secs(1)
}

fn default_pacing_min() -> Duration {
    Duration::from_millis(500)
}

fn default_pacing_max() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> u32 {
    1
}

fn default_replica_pacing() -> Duration {
    Duration::from_millis(100)
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            target: TargetConfig::default(),
            ramp: RampConfig::default(),
            pacing: PacingConfig::default(),
            amplification: AmplificationConfig::default(),
            prompts: PromptConfig::default(),
            thresholds: ThresholdConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: default_target_url(),
            api: default_api(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout: default_request_timeout(),
        }
    }
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            start_target: 0,
            stages: Vec::new(),
            graceful_ramp_down: default_graceful_window(),
            graceful_stop: default_graceful_window(),
            tick: default_tick(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min: default_pacing_min(),
            max: default_pacing_max(),
        }
    }
}

impl Default for AmplificationConfig {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            replica_pacing: default_replica_pacing(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            url: None,
            refresh_interval: default_refresh_interval(),
            defaults: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl PromptConfig {
    /// Fallback prompts, falling back in turn to the built-in questions.
    pub fn default_prompts(&self) -> Vec<String> {
        if self.defaults.is_empty() {
            DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
        } else {
            self.defaults.clone()
        }
    }
}

impl ThresholdConfig {
    /// Parse every expression; the first malformed one is returned as an error.
    pub fn compile(&self) -> ConfigResult<ThresholdSet> {
        let duration = self
            .http_req_duration
            .iter()
            .map(|expr| Threshold::parse(MetricName::HttpReqDuration, expr));
        let failed = self
            .http_req_failed
            .iter()
            .map(|expr| Threshold::parse(MetricName::HttpReqFailed, expr));

        duration
            .chain(failed)
            .collect::<ConfigResult<Vec<_>>>()
            .map(ThresholdSet::new)
    }
}

impl ScenarioConfig {
    /// Load a scenario from a TOML file.
    ///
    /// Returns an error if the file doesn't exist or has invalid TOML syntax.
    pub fn from_file(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::TomlError {
            path: Some(path),
            source: e,
        })
    }

    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::TomlError {
            path: None,
            source: e,
        })
    }

    /// Apply environment variable overrides from the process environment.
    ///
    /// Supported environment variables:
    /// - `API_URL`, `VLLM_URL`, `FRONTEND_URL` - Target base URL (first set wins)
    /// - `MULTIPLIER` - Amplification factor
    /// - `MODEL` - Model identifier
    /// - `SURGE_PROMPT_URL` - Base URL serving `/api/questions`
    /// - `SURGE_LOG_LEVEL` - Log level
    /// - `SURGE_LOG_FORMAT` - Log format
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some((var, url)) = TARGET_URL_VARS
            .iter()
            .find_map(|var| lookup(var).map(|url| (*var, url)))
        {
            debug!(var, url = %url, "Target URL taken from environment");
            self.target.url = url;
        }

        if let Some(raw) = lookup("MULTIPLIER") {
            self.amplification.multiplier =
                raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "MULTIPLIER",
                    value: raw.clone(),
                    reason: "expected a positive integer".to_string(),
                })?;
        }

        if let Some(model) = lookup("MODEL") {
            self.target.model = model;
        }

        if let Some(url) = lookup("SURGE_PROMPT_URL") {
            self.prompts.url = Some(url);
        }

        if let Some(raw) = lookup("SURGE_REQUEST_TIMEOUT") {
            self.target.timeout = parse_duration("SURGE_REQUEST_TIMEOUT", &raw)?;
        }

        if let Some(level) = lookup("SURGE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("SURGE_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate the scenario.
    ///
    /// Returns an error if any value would make the run meaningless. Nothing
    /// is sent before this passes.
    pub fn validate(&self) -> ConfigResult<()> {
        self.ramp_plan()?;

        if !is_http_url(&self.target.url) {
            return Err(ConfigError::validation(format!(
                "target.url must start with http:// or https:// (got `{}`)",
                self.target.url
            )));
        }

        if let Some(url) = &self.prompts.url {
            if !is_http_url(url) {
                return Err(ConfigError::validation(format!(
                    "prompts.url must start with http:// or https:// (got `{}`)",
                    url
                )));
            }
        }

        if self.target.model.trim().is_empty() {
            return Err(ConfigError::validation("target.model cannot be empty"));
        }

        if self.target.max_tokens == 0 {
            return Err(ConfigError::validation("target.max_tokens must be > 0"));
        }

        if !(self.target.temperature >= 0.0 && self.target.temperature <= 2.0) {
            return Err(ConfigError::validation(
                "target.temperature must be between 0.0 and 2.0",
            ));
        }

        if self.target.timeout.is_zero() {
            return Err(ConfigError::validation("target.timeout must be > 0"));
        }

        if self.ramp.tick.is_zero() {
            return Err(ConfigError::validation("ramp.tick must be > 0"));
        }

        if self.pacing.min > self.pacing.max {
            return Err(ConfigError::validation(
                "pacing.min must be <= pacing.max",
            ));
        }

        if self.amplification.multiplier == 0 {
            return Err(ConfigError::validation(
                "amplification.multiplier must be >= 1",
            ));
        }

        if self.prompts.refresh_interval.is_zero() {
            return Err(ConfigError::validation(
                "prompts.refresh_interval must be > 0",
            ));
        }

        if self.prompts.defaults.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::validation(
                "prompts.defaults cannot contain blank prompts",
            ));
        }

        self.thresholds.compile()?;

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        // Validate log format
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    /// Build the immutable ramp plan from the `[ramp]` section.
    pub fn ramp_plan(&self) -> ConfigResult<RampPlan> {
        RampPlan::new(
            self.ramp.start_target,
            self.ramp.stages.clone(),
            self.ramp.graceful_ramp_down,
        )
    }

    /// Serialize back to TOML, e.g. to dump a preset as a starting point.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::validation(format!("cannot render scenario: {}", e)))
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal() -> ScenarioConfig {
        ScenarioConfig {
            ramp: RampConfig {
                stages: vec![Stage::new(Duration::from_secs(30), 5)],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ScenarioConfig::default();

        assert_eq!(config.target.url, "http://localhost:8000");
        assert_eq!(config.target.api, ApiKind::Completions);
        assert_eq!(config.target.timeout, Duration::from_secs(60));
        assert_eq!(config.amplification.multiplier, 1);
        assert_eq!(config.prompts.refresh_interval, Duration::from_secs(10));
        assert_eq!(config.ramp.tick, Duration::from_secs(1));
    }

    #[test]
    fn test_default_config_has_no_stages() {
        let result = ScenarioConfig::default().validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("ramp.stages cannot be empty"));
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_config_validation_pacing_inverted() {
        let mut config = minimal();
        config.pacing.min = Duration::from_secs(2);
        config.pacing.max = Duration::from_secs(1);

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("pacing.min must be <= pacing.max"));
    }

    #[test]
    fn test_config_validation_zero_multiplier() {
        let mut config = minimal();
        config.amplification.multiplier = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_url() {
        let mut config = minimal();
        config.target.url = "localhost:8000".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("target.url"));
    }

    #[test]
    fn test_config_validation_bad_threshold() {
        let mut config = minimal();
        config.thresholds.http_req_failed = vec!["rate<<0.3".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = minimal();
        config.logging.level = "invalid".to_string();

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("logging.level must be"));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            name = "two-step"

            [target]
            url = "http://vllm:8000"
            api = "chat"
            timeout = "45s"

            [ramp]
            graceful_ramp_down = "0s"
            stages = [
                { duration = "30s", target = 5 },
                { duration = "30s", target = 5 },
            ]

            [amplification]
            multiplier = 50

            [thresholds]
            http_req_duration = ["p(95)<20000"]
            http_req_failed = ["rate<=0.15"]
        "#;

        let config = ScenarioConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.name, "two-step");
        assert_eq!(config.target.api, ApiKind::Chat);
        assert_eq!(config.target.timeout, Duration::from_secs(45));
        assert_eq!(config.ramp.graceful_ramp_down, Duration::ZERO);
        assert_eq!(config.ramp.stages.len(), 2);
        assert_eq!(config.amplification.multiplier, 50);
        // Untouched sections keep their defaults
        assert_eq!(config.pacing.min, Duration::from_millis(500));

        let plan = config.ramp_plan().unwrap();
        assert_eq!(plan.total_duration(), Duration::from_secs(60));
        assert_eq!(config.thresholds.compile().unwrap().iter().count(), 2);
    }

    #[test]
    fn test_toml_bad_duration_is_parse_error() {
        let toml_str = r#"
            [ramp]
            stages = [{ duration = "forever", target = 1 }]
        "#;
        assert!(matches!(
            ScenarioConfig::from_toml_str(toml_str),
            Err(ConfigError::TomlError { path: None, .. })
        ));
    }

    #[test]
    fn test_env_override() {
        let mut config = minimal();
        config
            .apply_overrides_from(env(&[
                ("VLLM_URL", "http://vllm:8000"),
                ("FRONTEND_URL", "http://frontend:3000"),
                ("MULTIPLIER", "25"),
                ("MODEL", "meta-llama/Llama-3.1-8B-Instruct"),
                ("SURGE_PROMPT_URL", "http://api:8000"),
            ]))
            .unwrap();

        // VLLM_URL outranks FRONTEND_URL
        assert_eq!(config.target.url, "http://vllm:8000");
        assert_eq!(config.amplification.multiplier, 25);
        assert_eq!(config.target.model, "meta-llama/Llama-3.1-8B-Instruct");
        assert_eq!(config.prompts.url.as_deref(), Some("http://api:8000"));
    }

    #[test]
    fn test_env_api_url_wins() {
        let mut config = minimal();
        config
            .apply_overrides_from(env(&[
                ("API_URL", "http://api:8000"),
                ("VLLM_URL", "http://vllm:8000"),
            ]))
            .unwrap();
        assert_eq!(config.target.url, "http://api:8000");
    }

    #[test]
    fn test_env_bad_multiplier_is_fatal() {
        let mut config = minimal();
        let err = config
            .apply_overrides_from(env(&[("MULTIPLIER", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("MULTIPLIER"));
    }

    #[test]
    fn test_default_prompts_fallback() {
        let mut prompts = PromptConfig::default();
        assert_eq!(prompts.default_prompts().len(), DEFAULT_QUESTIONS.len());

        prompts.defaults = vec!["custom".to_string()];
        assert_eq!(prompts.default_prompts(), vec!["custom".to_string()]);
    }

    #[test]
    fn test_toml_serialization_round_trip() {
        let config = minimal();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("duration = \"30s\""));

        let parsed = ScenarioConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.ramp.stages, config.ramp.stages);
        assert_eq!(parsed.target.timeout, config.target.timeout);
    }
}

//! Built-in scenarios for the autoscaling demo.

use crate::error::ConfigError;
use crate::scenario::{
    AmplificationConfig, ApiKind, PacingConfig, PromptConfig, RampConfig, ScenarioConfig,
    TargetConfig, ThresholdConfig,
};
use crate::stage::Stage;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Prompts about the demo's own infrastructure, used by the staged demo.
pub const INFRA_PROMPTS: &[&str] = &[
    "Explain the concept of autoscaling in Kubernetes in one paragraph.",
    "What are the benefits of using GPU instances for machine learning?",
    "Describe how KEDA works with custom metrics.",
    "What is Karpenter and how does it help with node provisioning?",
    "Explain the difference between horizontal and vertical scaling.",
    "How do inference servers handle concurrent requests?",
    "What are the key metrics to monitor for LLM serving?",
    "Describe the architecture of a typical ML inference pipeline.",
];

const LLAMA_MODEL: &str = "meta-llama/Llama-3.1-8B-Instruct";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Three load waves separated by node-provisioning waits
    StagedDemo,
    /// Audience questions amplified 50x against the chat API
    Amplified,
    /// Two steady workers through the frontend proxy
    Baseline,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::StagedDemo, Preset::Amplified, Preset::Baseline];

    pub fn name(&self) -> &'static str {
        match self {
            Self::StagedDemo => "staged-demo",
            Self::Amplified => "amplified",
            Self::Baseline => "baseline",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::StagedDemo => {
                "1->2 pods, then 2->10 pods, then sustained full load (~15m, completions API)"
            }
            Self::Amplified => "audience questions x MULTIPLIER, 2 -> 5 -> 1 workers (28m, chat API)",
            Self::Baseline => "constant 2 workers for 30m through the frontend (chat API)",
        }
    }

    /// The scenario this preset stands for, before env and CLI overrides.
    pub fn config(&self) -> ScenarioConfig {
        match self {
            Self::StagedDemo => staged_demo(),
            Self::Amplified => amplified(),
            Self::Baseline => baseline(),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn staged_demo() -> ScenarioConfig {
    ScenarioConfig {
        name: Preset::StagedDemo.name().to_string(),
        target: TargetConfig {
            api: ApiKind::Completions,
            max_tokens: 50,
            timeout: secs(60),
            ..Default::default()
        },
        ramp: RampConfig {
            start_target: 0,
            stages: vec![
                // Light load: first scale-up (1 -> 2 pods)
                Stage::new(secs(30), 5),
                Stage::new(secs(30), 5),
                // Wait for the first node
                Stage::new(mins(5), 2),
                // Medium load: aggressive scale-up (2 -> 10 pods)
                Stage::new(secs(30), 30),
                Stage::new(secs(30), 30),
                // Wait for the remaining nodes
                Stage::new(mins(5), 5),
                // Full sustained load
                Stage::new(secs(30), 50),
                Stage::new(mins(2), 50),
                // Cooldown
                Stage::new(secs(30), 0),
            ],
            graceful_ramp_down: secs(30),
            ..Default::default()
        },
        pacing: PacingConfig {
            min: Duration::from_millis(500),
            max: secs(1),
        },
        prompts: PromptConfig {
            defaults: INFRA_PROMPTS.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        },
        thresholds: ThresholdConfig {
            // Generous for cold starts while nodes come up
            http_req_duration: vec!["p(95)<30000".to_string()],
            http_req_failed: vec!["rate<0.3".to_string()],
        },
        ..Default::default()
    }
}

fn amplified() -> ScenarioConfig {
    ScenarioConfig {
        name: Preset::Amplified.name().to_string(),
        target: TargetConfig {
            api: ApiKind::Chat,
            model: LLAMA_MODEL.to_string(),
            max_tokens: 100,
            ..Default::default()
        },
        ramp: RampConfig {
            stages: vec![
                Stage::new(mins(2), 2),
                Stage::new(mins(23), 5),
                Stage::new(mins(3), 1),
            ],
            ..Default::default()
        },
        pacing: PacingConfig {
            min: secs(1),
            max: secs(1),
        },
        amplification: AmplificationConfig {
            multiplier: 50,
            replica_pacing: Duration::from_millis(100),
        },
        prompts: PromptConfig {
            url: Some("http://localhost:8000".to_string()),
            refresh_interval: secs(10),
            defaults: Vec::new(),
        },
        ..Default::default()
    }
}

fn baseline() -> ScenarioConfig {
    ScenarioConfig {
        name: Preset::Baseline.name().to_string(),
        target: TargetConfig {
            url: "http://localhost:3000".to_string(),
            api: ApiKind::Chat,
            model: LLAMA_MODEL.to_string(),
            max_tokens: 100,
            ..Default::default()
        },
        ramp: RampConfig {
            start_target: 2,
            stages: vec![Stage::new(mins(30), 2)],
            ..Default::default()
        },
        pacing: PacingConfig {
            min: secs(1),
            max: secs(1),
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for preset in Preset::ALL {
            let config = preset.config();
            assert!(config.validate().is_ok(), "{} failed validation", preset);
            assert_eq!(config.name, preset.name());
        }
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!("amplified".parse::<Preset>().unwrap(), Preset::Amplified);
        assert!(matches!(
            "k6".parse::<Preset>(),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_staged_demo_schedule() {
        let plan = Preset::StagedDemo.config().ramp_plan().unwrap();

        // 30s + 30s + 5m + 30s + 30s + 5m + 30s + 2m + 30s
        assert_eq!(plan.total_duration(), Duration::from_secs(900));
        assert_eq!(plan.peak_target(), 50);
        assert_eq!(plan.desired_at(Duration::from_secs(45)), 5);
        assert_eq!(plan.desired_at(Duration::from_secs(750)), 50);
    }

    #[test]
    fn test_amplified_defaults() {
        let config = Preset::Amplified.config();
        assert_eq!(config.amplification.multiplier, 50);
        assert_eq!(config.target.api, ApiKind::Chat);
        assert!(config.prompts.url.is_some());
        assert_eq!(
            config.ramp_plan().unwrap().total_duration(),
            Duration::from_secs(28 * 60)
        );
    }

    #[test]
    fn test_baseline_holds_two_workers() {
        let plan = Preset::Baseline.config().ramp_plan().unwrap();
        assert_eq!(plan.desired_at(Duration::ZERO), 2);
        assert_eq!(plan.desired_at(Duration::from_secs(29 * 60)), 2);
    }
}

//! Scenario loading from disk, end to end through validation.

use std::io::Write;
use std::time::Duration;
use surge_core::{ApiKind, ConfigError, Preset, ScenarioConfig};
use tempfile::NamedTempFile;

const STAGED: &str = r#"
name = "rehearsal"

[target]
url = "http://vllm.demo.svc:8000"
api = "completions"
model = "TheBloke/Mistral-7B-Instruct-v0.2-AWQ"
timeout = "60s"

[ramp]
graceful_ramp_down = "30s"
stages = [
    { duration = "30s", target = 5 },
    { duration = "30s", target = 5 },
    { duration = "5m", target = 2 },
]

[pacing]
min = "500ms"
max = "1s"

[prompts]
url = "http://api.demo.svc:8000"
refresh_interval = "10s"

[thresholds]
http_req_duration = ["p(95)<30000"]
http_req_failed = ["rate<0.3"]
"#;

fn write_scenario(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_and_validate_scenario_file() {
    let file = write_scenario(STAGED);

    let config = ScenarioConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.name, "rehearsal");
    assert_eq!(config.target.api, ApiKind::Completions);
    assert_eq!(config.prompts.url.as_deref(), Some("http://api.demo.svc:8000"));

    let plan = config.ramp_plan().unwrap();
    assert_eq!(plan.total_duration(), Duration::from_secs(360));
    assert_eq!(plan.graceful_ramp_down(), Duration::from_secs(30));
}

#[test]
fn test_missing_file_reports_path() {
    let err = ScenarioConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, ConfigError::IoError { .. }));
    assert!(err.to_string().contains("/definitely/not/here.toml"));
}

#[test]
fn test_invalid_toml_reports_path() {
    let file = write_scenario("[ramp\nstages = 3");
    let err = ScenarioConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::TomlError { path: Some(_), .. }));
}

#[test]
fn test_negative_target_is_rejected_by_parser() {
    let file = write_scenario(
        r#"
        [ramp]
        stages = [{ duration = "30s", target = -1 }]
        "#,
    );
    assert!(ScenarioConfig::from_file(file.path()).is_err());
}

#[test]
fn test_zero_duration_stage_fails_validation() {
    let file = write_scenario(
        r#"
        [ramp]
        stages = [{ duration = "0s", target = 3 }]
        "#,
    );
    let config = ScenarioConfig::from_file(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("duration must be > 0"));
}

#[test]
fn test_preset_dumps_as_loadable_file() {
    for preset in Preset::ALL {
        let rendered = preset.config().to_toml_string().unwrap();
        let file = write_scenario(&rendered);
        let reloaded = ScenarioConfig::from_file(file.path()).unwrap();
        reloaded.validate().unwrap();
        assert_eq!(
            reloaded.ramp_plan().unwrap(),
            preset.config().ramp_plan().unwrap()
        );
    }
}

#[test]
fn test_bundled_scenarios_match_presets() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios");

    for preset in [Preset::StagedDemo, Preset::Amplified] {
        let path = dir.join(format!("{}.toml", preset.name()));
        let config = ScenarioConfig::from_file(&path).unwrap();
        config.validate().unwrap();

        let expected = preset.config();
        assert_eq!(config.name, expected.name);
        assert_eq!(config.target.api, expected.target.api);
        assert_eq!(config.target.model, expected.target.model);
        assert_eq!(config.amplification.multiplier, expected.amplification.multiplier);
        assert_eq!(config.ramp_plan().unwrap(), expected.ramp_plan().unwrap());
    }
}

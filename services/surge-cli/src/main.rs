use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use surge_core::duration::{format_duration, parse_duration};
use surge_core::{ConfigError, Preset, ScenarioConfig};
use surge_engine::{EngineError, LoadRun, ReportFormat};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod progress;

#[derive(Parser, Debug)]
#[command(name = "surge")]
#[command(about = "Staged HTTP load generator for inference autoscaling demos", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the scenario comes from. Defaults to the `staged-demo` preset.
#[derive(Args, Debug)]
struct ScenarioArgs {
    /// Scenario file (TOML)
    #[arg(long, conflicts_with = "preset")]
    scenario_file: Option<PathBuf>,

    /// Built-in scenario (see `surge presets`)
    #[arg(long)]
    preset: Option<Preset>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a load scenario against the target
    Run {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Target base URL (overrides API_URL/VLLM_URL/FRONTEND_URL)
        #[arg(long)]
        target_url: Option<String>,

        /// Requests per logical user action
        #[arg(long)]
        multiplier: Option<u32>,

        /// Model identifier sent with every request
        #[arg(long)]
        model: Option<String>,

        /// Base URL serving /api/questions
        #[arg(long)]
        prompt_url: Option<String>,

        /// Write a report file at the end of the run
        #[arg(long)]
        report: Option<PathBuf>,

        /// Report format (markdown or json)
        #[arg(long, default_value = "markdown")]
        format: ReportFormat,

        /// Write Prometheus metrics in text format at the end of the run
        #[arg(long)]
        metrics_file: Option<PathBuf>,

        /// Disable the live progress line
        #[arg(long, default_value = "false")]
        quiet: bool,
    },

    /// Print the stage table and the worker schedule without sending traffic
    Plan {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Sampling step for the schedule (e.g. 10s, 1m)
        #[arg(long, default_value = "10s", value_parser = parse_step)]
        step: Duration,
    },

    /// List built-in scenarios
    Presets,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CliError {
    /// 2 when nothing was sent because the scenario is unusable.
    fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Engine(EngineError::Config(_)) => 2,
            Self::Engine(_) => 1,
        }
    }
}

/// Scenario overrides given on the command line.
#[derive(Debug, Default)]
struct Overrides {
    target_url: Option<String>,
    multiplier: Option<u32>,
    model: Option<String>,
    prompt_url: Option<String>,
}

fn parse_step(raw: &str) -> Result<Duration, ConfigError> {
    let step = parse_duration("--step", raw)?;
    if step.is_zero() {
        return Err(ConfigError::validation("--step must be > 0"));
    }
    Ok(step)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            scenario,
            target_url,
            multiplier,
            model,
            prompt_url,
            report,
            format,
            metrics_file,
            quiet,
        } => {
            let overrides = Overrides {
                target_url,
                multiplier,
                model,
                prompt_url,
            };
            let report = report.map(|path| (path, format));
            run(scenario, overrides, report, metrics_file, quiet).await
        }
        Commands::Plan { scenario, step } => plan(scenario, step),
        Commands::Presets => {
            presets();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Resolve the scenario: preset or file, then environment, then CLI flags.
fn load_scenario(args: &ScenarioArgs, overrides: &Overrides) -> Result<ScenarioConfig, CliError> {
    let mut config = match (&args.scenario_file, args.preset) {
        (Some(path), _) => ScenarioConfig::from_file(path)?,
        (None, Some(preset)) => preset.config(),
        (None, None) => Preset::StagedDemo.config(),
    };

    config.apply_env_overrides()?;

    if let Some(url) = &overrides.target_url {
        config.target.url = url.clone();
    }
    if let Some(multiplier) = overrides.multiplier {
        config.amplification.multiplier = multiplier;
    }
    if let Some(model) = &overrides.model {
        config.target.model = model.clone();
    }
    if let Some(url) = &overrides.prompt_url {
        config.prompts.url = Some(url.clone());
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str, format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(
    scenario: ScenarioArgs,
    overrides: Overrides,
    report: Option<(PathBuf, ReportFormat)>,
    metrics_file: Option<PathBuf>,
    quiet: bool,
) -> Result<ExitCode, CliError> {
    let config = load_scenario(&scenario, &overrides)?;
    init_logging(&config.logging.level, &config.logging.format);

    let show_progress = !quiet && config.logging.format != "json";
    let load_run = LoadRun::new(config)?;

    let progress = show_progress.then(|| {
        progress::spawn(
            load_run.progress(),
            load_run.stats(),
            load_run.plan().total_duration(),
        )
    });

    let summary = load_run.run(shutdown_signal()).await?;

    if let Some(handle) = progress {
        let _ = handle.await;
    }

    println!("{}", summary.render_text());

    if let Some((path, format)) = report {
        summary.write_report(&path, format)?;
        info!(path = %path.display(), "Report written");
    }

    if let Some(path) = metrics_file {
        let text = surge_engine::metrics::gather_text()?;
        std::fs::write(&path, text).map_err(|e| EngineError::Io {
            path: path.clone(),
            source: e,
        })?;
        info!(path = %path.display(), "Metrics written");
    }

    if summary.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!("Thresholds breached");
        eprintln!("{}", summary.failure_summary());
        Ok(ExitCode::from(1))
    }
}

fn plan(scenario: ScenarioArgs, step: Duration) -> Result<ExitCode, CliError> {
    let config = load_scenario(&scenario, &Overrides::default())?;
    let plan = config.ramp_plan()?;

    println!("Scenario: {}", config.name);
    println!(
        "Total: {}, peak {} workers, start {}, graceful ramp-down {}",
        format_duration(plan.total_duration()),
        plan.peak_target(),
        plan.start_target(),
        format_duration(plan.graceful_ramp_down())
    );
    println!(
        "Target: {} ({}), multiplier {}",
        config.target.url,
        config.target.api.path(),
        config.amplification.multiplier
    );
    println!();

    println!("{:>3}  {:>10}  {:>6}  {:>10}", "#", "duration", "target", "ends at");
    for (i, (stage, boundary)) in plan
        .stages()
        .iter()
        .zip(plan.boundaries().iter())
        .enumerate()
    {
        println!(
            "{:>3}  {:>10}  {:>6}  {:>10}",
            i + 1,
            format_duration(stage.duration),
            stage.target,
            format_duration(boundary.at)
        );
    }
    println!();

    println!("Schedule (every {}):", format_duration(step));
    println!("{:>10}  {:>7}", "t", "desired");
    let mut t = Duration::ZERO;
    while t < plan.total_duration() {
        println!("{:>10}  {:>7}", format_duration(t), plan.desired_at(t));
        t += step;
    }
    println!("{:>10}  {:>7}", format_duration(plan.total_duration()), 0);

    Ok(ExitCode::SUCCESS)
}

fn presets() {
    for preset in Preset::ALL {
        println!("{:<12}  {}", preset.name(), preset.description());
    }
}

/// Wait for SIGTERM or SIGINT and end the schedule early.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), draining workers...");
        },
        _ = terminate => {
            info!("Received SIGTERM, draining workers...");
        },
    }
}

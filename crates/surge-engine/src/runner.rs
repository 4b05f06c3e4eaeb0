//! Wires a validated scenario into a controller, runs it, and evaluates the
//! thresholds once the schedule is over.

use crate::client::{CompletionTransport, HttpCompletionClient};
use crate::controller::{ConcurrencyController, ControllerSettings, ControllerSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::prompt::{HttpQuestionFetcher, PromptSource};
use crate::report::RunSummary;
use crate::stats::RunStats;
use crate::worker::{WorkerBehavior, WorkerContext};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use surge_core::{RampPlan, ScenarioConfig, ThresholdSet};
use tokio::sync::watch;
use tracing::info;

/// Upper bound on a single `/api/questions` call.
const PROMPT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A load run ready to start.
pub struct LoadRun {
    config: ScenarioConfig,
    plan: RampPlan,
    thresholds: ThresholdSet,
    stats: Arc<RunStats>,
    controller: ConcurrencyController,
}

impl LoadRun {
    /// Validate `config` and build the HTTP clients. Nothing is sent yet.
    pub fn new(config: ScenarioConfig) -> EngineResult<Self> {
        config.validate()?;
        let transport: Arc<dyn CompletionTransport> =
            Arc::new(HttpCompletionClient::new(&config.target)?);
        let source = Arc::new(build_prompt_source(&config)?);
        Self::assemble(config, transport, source)
    }

    /// Same as [`LoadRun::new`] with a caller-supplied transport.
    pub fn with_transport(
        config: ScenarioConfig,
        transport: Arc<dyn CompletionTransport>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let source = Arc::new(build_prompt_source(&config)?);
        Self::assemble(config, transport, source)
    }

    fn assemble(
        config: ScenarioConfig,
        transport: Arc<dyn CompletionTransport>,
        source: Arc<PromptSource>,
    ) -> EngineResult<Self> {
        let plan = config.ramp_plan()?;
        let thresholds = config.thresholds.compile()?;
        let stats = Arc::new(RunStats::new());

        let ctx = WorkerContext {
            source,
            transport,
            stats: Arc::clone(&stats),
            behavior: WorkerBehavior::from_config(&config),
        };
        let controller =
            ConcurrencyController::new(plan.clone(), ControllerSettings::from_config(&config), ctx);

        Ok(Self {
            config,
            plan,
            thresholds,
            stats,
            controller,
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn plan(&self) -> &RampPlan {
        &self.plan
    }

    /// Live aggregates, for progress display while the run is going.
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    pub fn progress(&self) -> watch::Receiver<ControllerSnapshot> {
        self.controller.subscribe()
    }

    /// Run the schedule to completion (or until `shutdown` resolves) and
    /// evaluate thresholds on the final aggregates.
    pub async fn run<F>(self, shutdown: F) -> EngineResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        info!(
            scenario = %self.config.name,
            target = %self.config.target.url,
            api = ?self.config.target.api,
            model = %self.config.target.model,
            multiplier = self.config.amplification.multiplier,
            "Starting load run"
        );

        let outcome = self.controller.run(shutdown).await;
        let stats = self.stats.snapshot();
        let evaluation = self.thresholds.evaluate(&stats);
        let duration = outcome.elapsed;

        info!(
            total = stats.total_requests,
            failed = stats.failed_requests,
            passed = evaluation.passed(),
            "Load run complete"
        );

        Ok(RunSummary {
            scenario: self.config.name,
            target: self.config.target.url,
            started_at,
            duration,
            stats,
            evaluation,
            outcome,
        })
    }
}

/// Refreshing source when a questions URL is configured, fixed otherwise.
fn build_prompt_source(config: &ScenarioConfig) -> EngineResult<PromptSource> {
    let defaults = config.prompts.default_prompts();

    match &config.prompts.url {
        Some(url) => {
            let http = reqwest::Client::builder()
                .timeout(PROMPT_FETCH_TIMEOUT)
                .build()
                .map_err(EngineError::HttpClient)?;
            let fetcher = HttpQuestionFetcher::new(http, url);
            info!(url = %fetcher.url(), "Fetching audience questions");
            Ok(PromptSource::refreshing(
                Arc::new(fetcher),
                defaults,
                config.prompts.refresh_interval,
            ))
        }
        None => Ok(PromptSource::fixed(defaults)),
    }
}

//! Runtime for staged load runs: workers, the concurrency controller,
//! prompt supply, response checks, aggregates and reports.

pub mod checker;
pub mod client;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod prompt;
pub mod report;
pub mod runner;
pub mod stats;
pub mod worker;

pub use checker::{PromptOrigin, RequestResult, ResponseChecker, StatusClass};
pub use client::{CompletionTransport, HttpCompletionClient};
pub use controller::{
    ConcurrencyController, ControllerOutcome, ControllerSettings, ControllerSnapshot,
};
pub use error::{EngineError, EngineResult};
pub use prompt::{FetchError, HttpQuestionFetcher, PromptFetcher, PromptSource, SelectedPrompt};
pub use report::{ReportFormat, RunSummary};
pub use runner::LoadRun;
pub use stats::{RunStats, StatsSnapshot};
pub use worker::{VirtualWorker, WorkerBehavior, WorkerCell, WorkerContext, WorkerState};

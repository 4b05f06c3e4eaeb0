//! Prompt source: a refreshable cache of audience questions with a static
//! fallback.
//!
//! # Concurrency
//!
//! The cached sequence lives behind a `parking_lot::RwLock` and is swapped
//! wholesale (`Arc<[String]>`), so readers never observe a partially
//! refreshed list. At most one refresh is in flight at a time; callers that
//! find a refresh already running use the current cache instead of waiting.
//!
//! # Failure handling
//!
//! A failed refresh leaves both the cache and `last_fetched_at` untouched.
//! Attempts are spaced by `refresh_interval` from the previous attempt, so a
//! dead questions API is retried at the normal cadence and picked up again as
//! soon as it answers.

use crate::checker::PromptOrigin;
use crate::metrics::PROMPT_REFRESH;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a refresh produced nothing usable.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no questions available")]
    Empty,
}

/// Remote list of prompts.
#[async_trait]
pub trait PromptFetcher: Send + Sync {
    async fn fetch_prompts(&self) -> Result<Vec<String>, FetchError>;
}

#[derive(Deserialize)]
struct QuestionsResponse {
    questions: Vec<QuestionEntry>,
}

#[derive(Deserialize)]
struct QuestionEntry {
    question: String,
}

/// `GET {base}/api/questions` returning `{ "questions": [ { "question": ... } ] }`.
pub struct HttpQuestionFetcher {
    http: reqwest::Client,
    url: String,
}

impl HttpQuestionFetcher {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}/api/questions", base_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Extract non-blank questions from a response body.
    pub fn parse(body: &[u8]) -> Result<Vec<String>, FetchError> {
        let parsed: QuestionsResponse = serde_json::from_slice(body)?;
        let questions: Vec<String> = parsed
            .questions
            .into_iter()
            .map(|entry| entry.question.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        if questions.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(questions)
    }
}

#[async_trait]
impl PromptFetcher for HttpQuestionFetcher {
    async fn fetch_prompts(&self) -> Result<Vec<String>, FetchError> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(FetchError::Status(status));
        }
        let body = response.bytes().await?;
        Self::parse(&body)
    }
}

/// The time-stamped cache.
#[derive(Debug, Default)]
struct PromptPool {
    prompts: Option<Arc<[String]>>,
    last_fetched_at: Option<Instant>,
    last_attempt_at: Option<Instant>,
}

impl PromptPool {
    fn is_fresh(&self, now: Instant, interval: Duration) -> bool {
        match (&self.prompts, self.last_fetched_at) {
            (Some(prompts), Some(at)) => !prompts.is_empty() && now.duration_since(at) < interval,
            _ => false,
        }
    }

    fn attempt_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_attempt_at
            .map(|at| now.duration_since(at) >= interval)
            .unwrap_or(true)
    }
}

/// One prompt chosen for a logical user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPrompt {
    pub text: String,
    pub origin: PromptOrigin,
}

/// Shared, refreshable prompt supply.
pub struct PromptSource {
    fetcher: Option<Arc<dyn PromptFetcher>>,
    defaults: Arc<[String]>,
    refresh_interval: Duration,
    pool: RwLock<PromptPool>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl PromptSource {
    /// A source that only ever serves `defaults`.
    pub fn fixed(defaults: Vec<String>) -> Self {
        Self {
            fetcher: None,
            defaults: defaults.into(),
            refresh_interval: Duration::MAX,
            pool: RwLock::new(PromptPool::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A source that refreshes from `fetcher` at most every `refresh_interval`.
    pub fn refreshing(
        fetcher: Arc<dyn PromptFetcher>,
        defaults: Vec<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            fetcher: Some(fetcher),
            defaults: defaults.into(),
            refresh_interval,
            pool: RwLock::new(PromptPool::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current prompt sequence, refreshing first when due.
    pub async fn fetch(&self) -> (Arc<[String]>, PromptOrigin) {
        let Some(fetcher) = &self.fetcher else {
            return (Arc::clone(&self.defaults), PromptOrigin::Default);
        };

        let now = Instant::now();
        let due = {
            let pool = self.pool.read();
            !pool.is_fresh(now, self.refresh_interval)
                && pool.attempt_due(now, self.refresh_interval)
        };

        if due {
            // Another worker is already refreshing: use what we have.
            if let Ok(_guard) = self.refresh_lock.try_lock() {
                let still_due = {
                    let pool = self.pool.read();
                    !pool.is_fresh(now, self.refresh_interval)
                        && pool.attempt_due(now, self.refresh_interval)
                };
                if still_due {
                    self.refresh(fetcher.as_ref()).await;
                }
            }
        }

        self.current()
    }

    /// Uniformly random prompt from the current sequence.
    pub async fn pick(&self) -> SelectedPrompt {
        let (prompts, origin) = self.fetch().await;
        let idx = rand::thread_rng().gen_range(0..prompts.len());
        SelectedPrompt {
            text: prompts[idx].clone(),
            origin,
        }
    }

    /// Cached prompts if any were ever fetched, otherwise the defaults.
    pub fn current(&self) -> (Arc<[String]>, PromptOrigin) {
        match &self.pool.read().prompts {
            Some(prompts) if !prompts.is_empty() => (Arc::clone(prompts), PromptOrigin::Audience),
            _ => (Arc::clone(&self.defaults), PromptOrigin::Default),
        }
    }

    async fn refresh(&self, fetcher: &dyn PromptFetcher) {
        let attempted_at = Instant::now();
        self.pool.write().last_attempt_at = Some(attempted_at);

        match fetcher.fetch_prompts().await {
            Ok(prompts) if !prompts.is_empty() => {
                let count = prompts.len();
                let mut pool = self.pool.write();
                let changed = pool.prompts.as_deref().map(|p| p.len()) != Some(count);
                pool.prompts = Some(prompts.into());
                pool.last_fetched_at = Some(Instant::now());
                drop(pool);

                PROMPT_REFRESH.with_label_values(&["success"]).inc();
                if changed {
                    info!(count, "Loaded audience questions");
                } else {
                    debug!(count, "Refreshed audience questions");
                }
            }
            Ok(_) => {
                PROMPT_REFRESH.with_label_values(&["empty"]).inc();
                debug!("Questions API returned no questions; keeping cached prompts");
            }
            Err(FetchError::Empty) => {
                PROMPT_REFRESH.with_label_values(&["empty"]).inc();
                debug!("Questions API returned no questions; keeping cached prompts");
            }
            Err(e) => {
                PROMPT_REFRESH.with_label_values(&["failure"]).inc();
                warn!(error = %e, "Failed to fetch audience questions");
            }
        }
    }
}

//! Outbound requests to the OpenAI-compatible endpoint.

use crate::checker::RequestResult;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use surge_core::{ApiKind, TargetConfig};

/// Sends one completion request and reports what happened.
///
/// Implementations never return an error: every failure mode is folded into
/// the [`RequestResult`].
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, prompt: &str) -> RequestResult;
}

/// `reqwest`-backed transport with a fixed per-request deadline.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api: ApiKind,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpCompletionClient {
    pub fn new(target: &TargetConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(target.timeout)
            .build()
            .map_err(EngineError::HttpClient)?;

        Ok(Self {
            http,
            endpoint: format!("{}{}", target.url.trim_end_matches('/'), target.api.path()),
            api: target.api,
            model: target.model.clone(),
            max_tokens: target.max_tokens,
            temperature: target.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// JSON body for `prompt`, shaped for the configured route.
    pub fn payload(&self, prompt: &str) -> Value {
        match self.api {
            ApiKind::Completions => json!({
                "model": self.model,
                "prompt": prompt,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }),
            ApiKind::Chat => json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }),
        }
    }
}

#[async_trait]
impl CompletionTransport for HttpCompletionClient {
    async fn complete(&self, prompt: &str) -> RequestResult {
        let start = Instant::now();

        // `.json()` sets `Content-Type: application/json`
        let response = match self
            .http
            .post(&self.endpoint)
            .json(&self.payload(prompt))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return RequestResult::transport_failure(describe(&e), start.elapsed()),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => RequestResult::from_response(status, &body, start.elapsed()),
            Err(e) => RequestResult {
                status: Some(status),
                latency: start.elapsed(),
                body_valid: false,
                error: Some(describe(&e)),
            },
        }
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(api: ApiKind) -> TargetConfig {
        TargetConfig {
            url: "http://vllm:8000/".to_string(),
            api,
            model: "TheBloke/Mistral-7B-Instruct-v0.2-AWQ".to_string(),
            max_tokens: 50,
            temperature: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_completions_payload() {
        let client = HttpCompletionClient::new(&target(ApiKind::Completions)).unwrap();
        assert_eq!(client.endpoint(), "http://vllm:8000/v1/completions");

        let payload = client.payload("Describe how KEDA works.");
        assert_eq!(payload["prompt"], "Describe how KEDA works.");
        assert_eq!(payload["model"], "TheBloke/Mistral-7B-Instruct-v0.2-AWQ");
        assert_eq!(payload["max_tokens"], 50);
        assert_eq!(payload["temperature"], 0.5);
        assert!(payload.get("messages").is_none());
    }

    #[test]
    fn test_chat_payload() {
        let client = HttpCompletionClient::new(&target(ApiKind::Chat)).unwrap();
        assert_eq!(client.endpoint(), "http://vllm:8000/v1/chat/completions");

        let payload = client.payload("Which line goes to Heathrow?");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "Which line goes to Heathrow?");
        assert!(payload.get("prompt").is_none());
    }
}

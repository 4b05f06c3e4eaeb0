//! Classification of individual responses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the prompt of a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptOrigin {
    /// Fetched from the audience questions API
    Audience,
    /// Built-in or configured fallback list
    Default,
}

impl PromptOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audience => "audience",
            Self::Default => "default",
        }
    }
}

/// Outcome of one physical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    /// HTTP status, `None` for transport failures (connect error, timeout)
    pub status: Option<u16>,
    pub latency: Duration,
    /// Body decoded and carried a non-empty `choices` array
    pub body_valid: bool,
    pub error: Option<String>,
}

impl RequestResult {
    /// Result for a response that arrived.
    pub fn from_response(status: u16, body: &[u8], latency: Duration) -> Self {
        let body_valid = ResponseChecker::body_has_choices(body);
        let error = if status != 200 {
            Some(format!("HTTP {}", status))
        } else if !body_valid {
            Some("response has no choices".to_string())
        } else {
            None
        };

        Self {
            status: Some(status),
            latency,
            body_valid,
            error,
        }
    }

    /// Result for a request that never produced a response.
    pub fn transport_failure(error: impl Into<String>, latency: Duration) -> Self {
        Self {
            status: None,
            latency,
            body_valid: false,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        ResponseChecker::is_success(self.status, self.body_valid)
    }

    pub fn status_class(&self) -> StatusClass {
        match self.status {
            None => StatusClass::Transport,
            Some(200..=299) => StatusClass::Success,
            Some(400..=499) => StatusClass::ClientError,
            Some(500..=599) => StatusClass::ServerError,
            Some(_) => StatusClass::Other,
        }
    }
}

/// Coarse status buckets reported in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
    Other,
    Transport,
}

/// Checks applied to every response: status 200 and a non-empty `choices`.
pub struct ResponseChecker;

#[derive(Deserialize)]
struct CompletionEnvelope {
    #[serde(default)]
    choices: Option<Vec<serde_json::Value>>,
}

impl ResponseChecker {
    /// Full check of a received response.
    pub fn check(status: u16, body: &[u8]) -> bool {
        Self::is_success(Some(status), Self::body_has_choices(body))
    }

    pub fn is_success(status: Option<u16>, body_valid: bool) -> bool {
        status == Some(200) && body_valid
    }

    /// True when the body is JSON with a non-empty `choices` array.
    /// Malformed payloads are simply invalid.
    pub fn body_has_choices(body: &[u8]) -> bool {
        serde_json::from_slice::<CompletionEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.choices)
            .map(|choices| !choices.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_BODY: &[u8] = br#"{"id":"cmpl-1","choices":[{"index":0,"text":"Kubernetes scales pods."}]}"#;

    #[test]
    fn test_200_with_choices_is_success() {
        let result = RequestResult::from_response(200, OK_BODY, Duration::from_millis(120));
        assert!(result.is_success());
        assert!(result.error.is_none());
        assert_eq!(result.status_class(), StatusClass::Success);
    }

    #[test]
    fn test_200_with_empty_choices_is_failure() {
        let result =
            RequestResult::from_response(200, br#"{"choices":[]}"#, Duration::from_millis(5));
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("response has no choices"));
    }

    #[test]
    fn test_malformed_body_is_failure() {
        assert!(!ResponseChecker::body_has_choices(b"<html>502 Bad Gateway</html>"));
        assert!(!ResponseChecker::body_has_choices(b""));
        assert!(!ResponseChecker::body_has_choices(br#"{"choices":null}"#));
        assert!(!ResponseChecker::body_has_choices(br#"{"object":"error"}"#));
        assert!(!ResponseChecker::body_has_choices(br#"{"choices":"yes"}"#));
        assert!(!ResponseChecker::body_has_choices(b"[1,2,3]"));
    }

    #[test]
    fn test_non_200_with_choices_is_failure() {
        let result = RequestResult::from_response(503, OK_BODY, Duration::from_millis(5));
        assert!(!result.is_success());
        assert_eq!(result.status_class(), StatusClass::ServerError);
        assert_eq!(result.error.as_deref(), Some("HTTP 503"));
        assert!(!ResponseChecker::check(503, OK_BODY));
        assert!(ResponseChecker::check(200, OK_BODY));
    }

    #[test]
    fn test_timeout_is_failure() {
        let result = RequestResult::transport_failure("operation timed out", Duration::from_secs(60));
        assert!(!result.is_success());
        assert_eq!(result.status, None);
        assert_eq!(result.status_class(), StatusClass::Transport);
    }
}

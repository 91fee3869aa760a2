//! Remote matcher collaborator and its HTTP implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::RemoteConfig;

/// Body of `POST {endpoint}/search`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub query: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    /// Loosely JSON-formatted array of snippets
    pub raw_response: String,
}

/// Error body returned by the service alongside non-2xx statuses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    should_retry: bool,
    /// Seconds
    retry_after: Option<f64>,
}

/// Body of `POST {endpoint}/usage`, one per issued batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub batch_ordinal: usize,
    pub snippet_count: usize,
    /// 1 if any snippet of the whole search was placed on the page
    pub matches_found: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote matcher temporarily unavailable: {message}")]
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("insufficient credits: {0}")]
    InsufficientCredits(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("rate limited by remote matcher: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("content too large: {0}")]
    ContentTooLarge(String),

    #[error("remote matcher error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Retryable { .. } | RemoteError::Network(_))
    }

    /// Server-suggested delay before retrying
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Retryable { retry_after, .. }
            | RemoteError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Map a failed HTTP response to a [`RemoteError`]
///
/// An explicit `shouldRetry` in the body wins over the status code.
pub fn classify_error(status: u16, body: &str) -> RemoteError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .error
        .or(parsed.message)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", status)
            } else {
                trimmed.chars().take(200).collect()
            }
        });
    let retry_after = parsed
        .retry_after
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);

    if parsed.should_retry {
        return RemoteError::Retryable {
            message,
            retry_after,
        };
    }

    match status {
        401 | 403 => RemoteError::Unauthorized(message),
        402 => RemoteError::InsufficientCredits(message),
        413 => RemoteError::ContentTooLarge(message),
        429 => RemoteError::RateLimited {
            message,
            retry_after,
        },
        500..=599 => RemoteError::Retryable {
            message,
            retry_after,
        },
        _ => RemoteError::Api { status, message },
    }
}

/// The remote natural-language matcher
#[async_trait]
pub trait RemoteMatcher: Send + Sync {
    /// Whether the session has credentials; checked before any call
    fn is_authenticated(&self) -> bool;

    async fn find_snippets(&self, request: &MatchRequest) -> Result<MatchResponse, RemoteError>;

    async fn report_usage(&self, report: &UsageReport) -> Result<(), RemoteError>;

    /// Refresh server-side user data (credit balance) after a credit error
    async fn resync_user(&self) -> Result<(), RemoteError>;

    /// Matcher name (for logging)
    fn name(&self) -> &str;
}

pub struct HttpRemoteMatcher {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpRemoteMatcher {
    pub fn new(config: &RemoteConfig, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, RemoteError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| RemoteError::Unauthorized("not signed in".to_string()))?;

        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &text))
    }
}

#[async_trait]
impl RemoteMatcher for HttpRemoteMatcher {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn find_snippets(&self, request: &MatchRequest) -> Result<MatchResponse, RemoteError> {
        log::debug!(
            "POST {}/search ({} bytes of content)",
            self.endpoint,
            request.content.len()
        );
        let response = self.post("search", request).await?;
        response
            .json::<MatchResponse>()
            .await
            .map_err(|e| RemoteError::Api {
                status: 200,
                message: format!("invalid response body: {}", e),
            })
    }

    async fn report_usage(&self, report: &UsageReport) -> Result<(), RemoteError> {
        self.post("usage", report).await.map(|_| ())
    }

    async fn resync_user(&self) -> Result<(), RemoteError> {
        self.post("user/sync", &serde_json::json!({})).await.map(|_| ())
    }

    fn name(&self) -> &str {
        "http"
    }
}

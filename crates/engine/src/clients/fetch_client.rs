use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;

use oemwatch_common::api::fetch::{FetchErrorBody, FetchErrorKind, FetchOptions, FetchRequest, FetchResponse};

/// A decoded, successful fetch (C2 result, §4.2).
#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub final_url: String,
    pub elapsed_ms: u64,
}

/// Thin client for the `oemwatch-fetch` service. Politeness, rate limiting
/// and retry all live in the service itself (C2); this wraps the wire call
/// and maps its error body into a typed error the crawl pipeline can branch
/// on (§4.2, §7).
pub struct FetchClient {
    http: reqwest::Client,
    base_url: String,
}

impl FetchClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    pub async fn fetch(
        &self,
        url: &str,
        headers: Option<HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<FetchedPage, FetchClientError> {
        let request = FetchRequest {
            url: url.to_string(),
            options: Some(FetchOptions {
                timeout_ms: Some(timeout.as_millis() as u64),
                headers,
            }),
        };

        let response = self
            .http
            .post(format!("{}/fetch", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| FetchClientError::Transport(e.to_string()))?;

        if response.status().is_success() {
            let body: FetchResponse = response
                .json()
                .await
                .map_err(|e| FetchClientError::Transport(e.to_string()))?;

            let decoded = base64::engine::general_purpose::STANDARD
                .decode(body.body_base64)
                .map_err(|e| FetchClientError::Transport(format!("invalid base64 body: {e}")))?;

            Ok(FetchedPage {
                status: body.status,
                headers: body.headers,
                body: decoded,
                final_url: body.final_url,
                elapsed_ms: body.elapsed_ms,
            })
        } else {
            let body: FetchErrorBody = response
                .json()
                .await
                .map_err(|e| FetchClientError::Transport(e.to_string()))?;
            Err(FetchClientError::from(body))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchClientError {
    #[error("transient network failure: {0}")]
    Transient(String),
    #[error("permanent page error: {0}")]
    Permanent(String),
    #[error("blocked: {0}")]
    Blocked { message: String, retry_after_secs: Option<u64> },
    #[error("fetch timed out: {0}")]
    Timeout(String),
    #[error("fetch transport error: {0}")]
    Transport(String),
}

impl From<FetchErrorBody> for FetchClientError {
    fn from(body: FetchErrorBody) -> Self {
        match body.kind {
            FetchErrorKind::Transient => FetchClientError::Transient(body.message),
            FetchErrorKind::Permanent4xx => FetchClientError::Permanent(body.message),
            FetchErrorKind::Blocked => FetchClientError::Blocked {
                message: body.message,
                retry_after_secs: body.retry_after_secs,
            },
            FetchErrorKind::Timeout => FetchClientError::Timeout(body.message),
        }
    }
}

impl From<FetchClientError> for oemwatch_common::OemWatchError {
    fn from(e: FetchClientError) -> Self {
        match e {
            FetchClientError::Transient(m) => oemwatch_common::OemWatchError::TransientNetwork(m),
            FetchClientError::Permanent(m) => oemwatch_common::OemWatchError::PermanentPageError(m),
            FetchClientError::Blocked { message, .. } => oemwatch_common::OemWatchError::Blocked(message),
            FetchClientError::Timeout(m) => oemwatch_common::OemWatchError::Timeout(m),
            FetchClientError::Transport(m) => oemwatch_common::OemWatchError::Fetch(m),
        }
    }
}

use oemwatch_common::api::render::{RenderRequest, RenderResponse, WaitPolicy};

/// Thin client for the `oemwatch-render` service (C3, §4.3). The renderer
/// owns session pooling and the network observer; this just issues one
/// `/render` call per page.
pub struct RenderClient {
    http: reqwest::Client,
    base_url: String,
}

impl RenderClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    pub async fn render(
        &self,
        url: &str,
        wait_policy: WaitPolicy,
        capture_screenshot: bool,
    ) -> Result<RenderResponse, RenderClientError> {
        let request = RenderRequest {
            url: url.to_string(),
            wait_policy,
            capture_screenshot,
        };

        let response = self
            .http
            .post(format!("{}/render", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| RenderClientError::Transport(e.to_string()))?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| RenderClientError::Transport(e.to_string()))
        } else {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            if status.as_u16() == 504 {
                Err(RenderClientError::Timeout(message))
            } else {
                Err(RenderClientError::Transport(format!("{status}: {message}")))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderClientError {
    #[error("render timed out: {0}")]
    Timeout(String),
    #[error("render transport error: {0}")]
    Transport(String),
}

impl From<RenderClientError> for oemwatch_common::OemWatchError {
    fn from(e: RenderClientError) -> Self {
        match e {
            RenderClientError::Timeout(m) => oemwatch_common::OemWatchError::Timeout(m),
            RenderClientError::Transport(m) => oemwatch_common::OemWatchError::Render(m),
        }
    }
}

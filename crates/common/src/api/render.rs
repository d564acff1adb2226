//! Wire contracts between `oemwatch-engine` and the `oemwatch-render`
//! service (C3, §4.3). One request/response pair per headless-rendered
//! page, carrying the full network-observer trace alongside the DOM.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "value")]
pub enum WaitPolicy {
    DomContentLoaded,
    NetworkIdle(u64),
    FixedDelay(u64),
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::DomContentLoaded
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    #[serde(default)]
    pub wait_policy: WaitPolicy,
    #[serde(default)]
    pub capture_screenshot: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderResponse {
    pub html: String,
    pub final_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_sha256: Option<String>,
    pub network: NetworkTrace,
    pub elapsed_ms: u64,
}

/// One HTTP exchange captured by the network observer, identified by the
/// CDP request-id. Per §4.3's ordering guarantee, `response` and
/// `loading_finished` are only ever populated after `requestWillBeSent`
/// has been observed for the same request-id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservedRequest {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub request_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ObservedResponse>,
    pub loading_finished: bool,
    pub loading_failed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub encoded_body_size: u64,
    pub from_cache: bool,
    /// Decoded body, base64-encoded. Absent if the observer's bounded
    /// queue evicted it, or `None` with `truncated = true` past the 10 MiB
    /// cap (§8 boundary behaviour).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_body_base64: Option<String>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkTrace {
    /// The full chronological request/response log for the session.
    pub requests: Vec<ObservedRequest>,
    /// The subset judged to be API candidates by the observer's own cheap
    /// filter: 2xx JSON, body >= 500 bytes, host not on the deny-list.
    /// The Probe (C4) still re-validates this independently.
    pub api_candidate_request_ids: Vec<String>,
}

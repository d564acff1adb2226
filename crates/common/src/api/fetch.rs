//! Wire contracts between `oemwatch-engine` and the `oemwatch-fetch` service
//! (C2, §4.2). One request/response pair per politely-fetched URL.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FetchOptions>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Additional headers — used to replay a DiscoveredAPI's
    /// `required_headers` or to carry a realistic browser fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Response body bytes, base64-encoded for wire transport.
    pub body_base64: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub elapsed_ms: u64,
}

/// Error kinds distinguished by the HTTP Fetcher contract (§4.2): a 2xx
/// response is a `FetchResponse`; anything else surfaces as one of these,
/// as the JSON body of a non-2xx reply from `oemwatch-fetch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Transient,
    Permanent4xx,
    Blocked,
    Timeout,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchErrorBody {
    pub kind: FetchErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

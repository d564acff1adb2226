use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DiscoveredApiId, OemId};

/// The shape classification the Probe assigns to a candidate payload (§9:
/// modeled as a tagged variant; the Probe classifier is the only place that
/// performs heuristic sniffing, everything downstream dispatches on the tag).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiDataType {
    Products,
    Offers,
    Config,
    Media,
    Unknown,
}

impl ApiDataType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Offers => "offers",
            Self::Config => "config",
            Self::Media => "media",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "products" => Self::Products,
            "offers" => Self::Offers,
            "config" => Self::Config,
            "media" => Self::Media,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveredApiStatus {
    Active,
    Retired,
}

impl DiscoveredApiStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "retired" => Self::Retired,
            _ => Self::Active,
        }
    }
}

/// A JSON endpoint observed during a browser render and judged replayable
/// directly via the HTTP Fetcher on subsequent crawls (C4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveredApi {
    pub id: DiscoveredApiId,
    pub oem_id: OemId,
    /// Normalised URL template — numeric ids become `{id}`, long hex
    /// tokens become `{token}`; brand/model slugs are kept literal.
    pub url_template: String,
    pub method: String,
    #[serde(default)]
    pub required_headers: HashMap<String, String>,
    pub data_type: ApiDataType,
    pub reliability_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub status: DiscoveredApiStatus,
    pub created_at: DateTime<Utc>,
}

impl DiscoveredApi {
    pub fn new(
        oem_id: OemId,
        url_template: String,
        method: String,
        data_type: ApiDataType,
    ) -> Self {
        Self {
            id: DiscoveredApiId::new(),
            oem_id,
            url_template,
            method,
            required_headers: HashMap::new(),
            data_type,
            reliability_score: 0.5,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            status: DiscoveredApiStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Whether this API is eligible to be replayed ahead of a render
    /// (§4.4 Replay decision); cool-down is evaluated by the caller using
    /// `last_failure_at`.
    pub fn is_replay_eligible(&self, min_reliability: f64) -> bool {
        self.status == DiscoveredApiStatus::Active && self.reliability_score >= min_reliability
    }
}

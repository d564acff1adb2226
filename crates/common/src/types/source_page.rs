use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OemId, SourcePageId};
use crate::types::PageType;

/// Lifecycle status of a tracked source page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePageStatus {
    Active,
    Removed,
    Error,
    Blocked,
}

impl SourcePageStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Removed => "removed",
            Self::Error => "error",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "removed" => Self::Removed,
            "error" => Self::Error,
            "blocked" => Self::Blocked,
            _ => Self::Active,
        }
    }
}

/// One URL belonging to one OEM, tracked by the Page Registry (C8).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourcePage {
    pub id: SourcePageId,
    pub oem_id: OemId,
    pub url: String,
    pub page_type: PageType,
    /// Raw HTTP body digest from the last check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_hash: Option<String>,
    /// Normalised-DOM-text digest from the last render.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rendered_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed_at: Option<DateTime<Utc>>,
    /// Drives the cadence backoff in §4.8; reset to 0 on detected change.
    pub consecutive_no_change: u32,
    /// Consecutive `NotFound` outcomes; drives the `removed` transition at
    /// threshold N (§4.8). Reset to 0 on any other outcome.
    pub consecutive_not_found: u32,
    /// Consecutive `Blocked` outcomes; drives the `blocked` transition at
    /// threshold M (§4.8). Reset to 0 on any other outcome.
    pub consecutive_blocked: u32,
    pub status: SourcePageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Depth from the nearest seed URL, for `max_discovery_depth` bounding.
    pub discovery_depth: u32,
    pub created_at: DateTime<Utc>,
}

impl SourcePage {
    pub fn new_seed(oem_id: OemId, url: String, page_type: PageType) -> Self {
        Self {
            id: SourcePageId::new(),
            oem_id,
            url,
            page_type,
            last_hash: None,
            last_rendered_hash: None,
            last_checked_at: None,
            last_changed_at: None,
            consecutive_no_change: 0,
            consecutive_not_found: 0,
            consecutive_blocked: 0,
            status: SourcePageStatus::Active,
            error_message: None,
            discovery_depth: 0,
            created_at: Utc::now(),
        }
    }

    /// Effective refetch interval after backoff (§4.8; invariant 3 of §8
    /// bounds this at 8x the base interval).
    pub fn effective_interval_secs(&self) -> i64 {
        let base = self.page_type.base_interval_secs();
        let multiplier = (1.0 + 0.25 * self.consecutive_no_change as f64).min(8.0);
        (base as f64 * multiplier) as i64
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.effective_interval_secs(),
        }
    }
}

/// Outcome of one check against a SourcePage, reported to `RecordCheck`.
#[derive(Clone, Debug)]
pub enum CheckOutcome {
    /// Raw hash unchanged; no render attempted.
    NoChange { raw_hash: String },
    /// Rendered hash unchanged after a render was attempted.
    RenderedNoChange {
        raw_hash: String,
        rendered_hash: String,
    },
    /// Content changed at the rendered level.
    Changed {
        raw_hash: String,
        rendered_hash: String,
    },
    NotFound,
    Blocked,
    Error { message: String },
}

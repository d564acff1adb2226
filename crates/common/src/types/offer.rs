use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{OemId, OfferId, OfferVersionId};
use crate::types::Price;

/// A promotional offer, upserted by (`oem_id`, `external_key`) analogous to
/// Product (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub oem_id: OemId,
    pub external_key: String,
    pub offer_type: String,
    #[serde(default)]
    pub applicable_models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saving_amount: Option<Price>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Offer {
    /// Whether validity_end places the offer live right now, for the
    /// validity_changed severity rule in §4.1.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let after_start = self.validity_start.map(|s| now >= s).unwrap_or(true);
        let before_end = self.validity_end.map(|e| now < e).unwrap_or(true);
        after_start && before_end
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfferVersion {
    pub id: OfferVersionId,
    pub offer_id: OfferId,
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    pub snapshot: Value,
}

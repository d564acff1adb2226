use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{OemId, ProductId, ProductVersionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    ComingSoon,
    RunOut,
    Discontinued,
}

impl Availability {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::ComingSoon => "coming_soon",
            Self::RunOut => "run_out",
            Self::Discontinued => "discontinued",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "coming_soon" => Self::ComingSoon,
            "run_out" => Self::RunOut,
            "discontinued" => Self::Discontinued,
            _ => Self::Available,
        }
    }
}

/// Price as extracted; `amount_minor_units` is the canonicalised integer
/// form used for hashing and diffing (§4.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Price {
    pub amount_minor_units: i64,
    pub currency: String,
    pub price_type: String,
    pub raw_string: String,
}

/// One entry in a product's ordered `key_features` sequence. Order is
/// semantically meaningful and preserved through canonicalisation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyFeature {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A variant written inline on the parent product, or a back-reference to
/// a hoisted child Product (§9: never a strong parent -> child reference).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariantDescriptor {
    pub external_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// Explicit ordering key; when present, variants sort by this rather
    /// than discovery order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CtaLink {
    pub label: String,
    pub url: String,
}

/// A vehicle product, upserted by (`oem_id`, `external_key`) (C7, §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub oem_id: OemId,
    pub external_key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    pub availability: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(default)]
    pub key_features: Vec<KeyFeature>,
    #[serde(default)]
    pub variants: Vec<VariantDescriptor>,
    #[serde(default)]
    pub cta_links: Vec<CtaLink>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Product {
    /// `meta.parent_external_key` resolves a hoisted variant's parent at
    /// read time; there is never a strong reference held the other way.
    pub fn parent_external_key(&self) -> Option<&str> {
        self.meta.get("parent_external_key").and_then(|v| v.as_str())
    }

    /// Parent price defaults to the minimum variant price when unset (§4.7).
    pub fn resolved_price_minor_units(&self) -> Option<i64> {
        if let Some(p) = &self.price {
            return Some(p.amount_minor_units);
        }
        self.variants
            .iter()
            .filter_map(|v| v.price.as_ref().map(|p| p.amount_minor_units))
            .min()
    }
}

/// Immutable snapshot of a Product's canonical form at capture time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductVersion {
    pub id: ProductVersionId,
    pub product_id: ProductId,
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    pub snapshot: Value,
}

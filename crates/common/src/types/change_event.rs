use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::{ChangeEventId, OemId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Offer,
    Banner,
    Page,
}

impl EntityKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Offer => "offer",
            Self::Banner => "banner",
            Self::Page => "page",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventType {
    Created,
    Updated,
    Removed,
    PriceChanged,
    AvailabilityChanged,
    ValidityChanged,
    DesignChanged,
}

impl ChangeEventType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::PriceChanged => "price_changed",
            Self::AvailabilityChanged => "availability_changed",
            Self::ValidityChanged => "validity_changed",
            Self::DesignChanged => "design_changed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// One severity level up, capped at `Critical` — used for the
    /// per-OEM critical-field bump in §4.1.
    pub fn bump(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Critical,
            Self::Critical => Self::Critical,
        }
    }
}

/// One scalar field's before/after values in a typed diff.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDiff {
    pub from: Value,
    pub to: Value,
}

/// A typed, immutable record of a detected semantic change (C7 emits these).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: ChangeEventId,
    pub oem_id: OemId,
    pub entity_type: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    pub event_type: ChangeEventType,
    pub severity: Severity,
    pub summary: String,
    pub diff: HashMap<String, FieldDiff>,
    pub created_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        oem_id: OemId,
        entity_type: EntityKind,
        entity_id: Option<Uuid>,
        event_type: ChangeEventType,
        severity: Severity,
        summary: String,
        diff: HashMap<String, FieldDiff>,
    ) -> Self {
        Self {
            id: ChangeEventId::new(),
            oem_id,
            entity_type,
            entity_id,
            event_type,
            severity,
            summary,
            diff,
            created_at: Utc::now(),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ImportRunId, OemId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportRunStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

impl ImportRunStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ImportRunCounters {
    pub pages_checked: u32,
    pub pages_changed: u32,
    pub products_upserted: u32,
    pub offers_upserted: u32,
    pub errors: u32,
}

/// One orchestration pass over one OEM (C10); opened at orchestrator start,
/// closed regardless of success (§3, §7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: ImportRunId,
    pub oem_id: OemId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ImportRunStatus,
    pub counters: ImportRunCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_json: Option<Value>,
}

impl ImportRun {
    pub fn open(oem_id: OemId) -> Self {
        Self {
            id: ImportRunId::new(),
            oem_id,
            started_at: Utc::now(),
            finished_at: None,
            status: ImportRunStatus::Running,
            counters: ImportRunCounters::default(),
            error_json: None,
        }
    }

    /// Per §7 Propagation: a run with any per-page error closes `partial`,
    /// otherwise `completed`. `InvariantViolation` short-circuits this via
    /// `close_failed` instead.
    pub fn close(&mut self) {
        self.status = if self.counters.errors > 0 {
            ImportRunStatus::Partial
        } else {
            ImportRunStatus::Completed
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn close_failed(&mut self, error: Value) {
        self.status = ImportRunStatus::Failed;
        self.error_json = Some(error);
        self.finished_at = Some(Utc::now());
    }
}

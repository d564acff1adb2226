//! ImportRun persistence: one row per orchestration pass over one OEM
//! (C10, §3), opened at the start of a run and closed regardless of outcome.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use oemwatch_common::ids::{ImportRunId, OemId};
use oemwatch_common::types::{ImportRun, ImportRunCounters, ImportRunStatus};

use super::StoreError;

pub struct ImportRunStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ImportRunRow {
    id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    pages_checked: i32,
    pages_changed: i32,
    products_upserted: i32,
    offers_upserted: i32,
    errors: i32,
    error_json: Option<Value>,
}

impl ImportRunRow {
    fn into_domain(self, oem_id: OemId) -> ImportRun {
        let status = match self.status.as_str() {
            "completed" => ImportRunStatus::Completed,
            "failed" => ImportRunStatus::Failed,
            "partial" => ImportRunStatus::Partial,
            _ => ImportRunStatus::Running,
        };
        ImportRun {
            id: ImportRunId::from_uuid(self.id),
            oem_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            status,
            counters: ImportRunCounters {
                pages_checked: self.pages_checked.max(0) as u32,
                pages_changed: self.pages_changed.max(0) as u32,
                products_upserted: self.products_upserted.max(0) as u32,
                offers_upserted: self.offers_upserted.max(0) as u32,
                errors: self.errors.max(0) as u32,
            },
            error_json: self.error_json,
        }
    }
}

impl ImportRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn open(&self, run: &ImportRun) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO import_runs (id, oem_id, started_at, status)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(run.id.0)
        .bind(run.oem_id.as_str())
        .bind(run.started_at)
        .bind(run.status.as_db_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Persist the final state of a run (§7 Propagation): counters, status
    /// and finish time all move together, regardless of which close path
    /// the caller took.
    pub async fn close(&self, run: &ImportRun) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE import_runs SET finished_at = $1, status = $2, pages_checked = $3,
                pages_changed = $4, products_upserted = $5, offers_upserted = $6,
                errors = $7, error_json = $8
             WHERE id = $9",
        )
        .bind(run.finished_at)
        .bind(run.status.as_db_str())
        .bind(run.counters.pages_checked as i32)
        .bind(run.counters.pages_changed as i32)
        .bind(run.counters.products_upserted as i32)
        .bind(run.counters.offers_upserted as i32)
        .bind(run.counters.errors as i32)
        .bind(&run.error_json)
        .bind(run.id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Most recent runs for an OEM, newest first, for the Ingress
    /// `GetImportRuns` query (§6).
    pub async fn recent(&self, oem_id: &OemId, limit: i64) -> Result<Vec<ImportRun>, StoreError> {
        let rows: Vec<ImportRunRow> = sqlx::query_as(
            "SELECT * FROM import_runs WHERE oem_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(oem_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().map(|r| r.into_domain(oem_id.clone())).collect())
    }
}

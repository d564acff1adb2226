//! DiscoveredAPI persistence (C4, §4.4): upserts a nominated endpoint by
//! (oem_id, url_template, method) and surfaces replay-eligible candidates
//! for a page's OEM.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use oemwatch_common::ids::{DiscoveredApiId, OemId};
use oemwatch_common::types::{ApiDataType, DiscoveredApi, DiscoveredApiStatus};

use super::StoreError;

pub struct DiscoveredApiStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct DiscoveredApiRow {
    id: Uuid,
    url_template: String,
    method: String,
    required_headers: Value,
    data_type: String,
    reliability_score: f64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    consecutive_failures: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl DiscoveredApiRow {
    fn into_domain(self, oem_id: OemId) -> DiscoveredApi {
        DiscoveredApi {
            id: DiscoveredApiId::from_uuid(self.id),
            oem_id,
            url_template: self.url_template,
            method: self.method,
            required_headers: serde_json::from_value(self.required_headers).unwrap_or_default(),
            data_type: ApiDataType::from_db_str(&self.data_type),
            reliability_score: self.reliability_score,
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
            consecutive_failures: self.consecutive_failures.max(0) as u32,
            status: DiscoveredApiStatus::from_db_str(&self.status),
            created_at: self.created_at,
        }
    }
}

impl DiscoveredApiStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a freshly nominated endpoint, or leave an existing one's
    /// reliability bookkeeping untouched if already known (§4.4 step 3) —
    /// score updates only happen through `record_success`/`record_failure`.
    pub async fn upsert_candidate(
        &self,
        oem_id: &OemId,
        url_template: &str,
        method: &str,
        required_headers: &HashMap<String, String>,
        data_type: ApiDataType,
    ) -> Result<DiscoveredApiId, StoreError> {
        let id = DiscoveredApiId::new();
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO discovered_apis
                (id, oem_id, url_template, method, required_headers, data_type, reliability_score, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,0.5,now())
             ON CONFLICT (oem_id, url_template, method) DO UPDATE SET data_type = EXCLUDED.data_type
             RETURNING id",
        )
        .bind(id.0)
        .bind(oem_id.as_str())
        .bind(url_template)
        .bind(method)
        .bind(serde_json::to_value(required_headers).unwrap_or(Value::Null))
        .bind(data_type.as_db_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(DiscoveredApiId::from_uuid(row.0))
    }

    /// Every active endpoint for an OEM, for the Scheduler/Orchestrator's
    /// replay decision (§4.4, §4.10).
    pub async fn active_for_oem(&self, oem_id: &OemId) -> Result<Vec<DiscoveredApi>, StoreError> {
        let rows: Vec<DiscoveredApiRow> = sqlx::query_as(
            "SELECT * FROM discovered_apis WHERE oem_id = $1 AND status = 'active'",
        )
        .bind(oem_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows.into_iter().map(|r| r.into_domain(oem_id.clone())).collect())
    }

    pub async fn record_outcome(&self, api: &DiscoveredApi) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE discovered_apis SET reliability_score = $1, last_success_at = $2,
                last_failure_at = $3, consecutive_failures = $4, status = $5
             WHERE id = $6",
        )
        .bind(api.reliability_score)
        .bind(api.last_success_at)
        .bind(api.last_failure_at)
        .bind(api.consecutive_failures as i32)
        .bind(api.status.as_db_str())
        .bind(api.id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_roundtrips_data_type_and_status() {
        let row = DiscoveredApiRow {
            id: Uuid::new_v4(),
            url_template: "https://example.com/api/{id}".into(),
            method: "GET".into(),
            required_headers: serde_json::json!({}),
            data_type: "products".into(),
            reliability_score: 0.6,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            status: "retired".into(),
            created_at: Utc::now(),
        };
        let api = row.into_domain(OemId::new("ford"));
        assert_eq!(api.data_type, ApiDataType::Products);
        assert_eq!(api.status, DiscoveredApiStatus::Retired);
    }
}

//! Page Registry (C8, §4.8): tracked URLs per OEM, due-page selection,
//! check-outcome recording and link discovery bookkeeping.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use oemwatch_common::ids::{OemId, SourcePageId};
use oemwatch_common::types::{CheckOutcome, PageType, SourcePage, SourcePageStatus};

use super::StoreError;

pub struct PageRegistry {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SourcePageRow {
    id: Uuid,
    oem_id: String,
    url: String,
    page_type: String,
    last_hash: Option<String>,
    last_rendered_hash: Option<String>,
    last_checked_at: Option<DateTime<Utc>>,
    last_changed_at: Option<DateTime<Utc>>,
    consecutive_no_change: i32,
    consecutive_not_found: i32,
    consecutive_blocked: i32,
    status: String,
    error_message: Option<String>,
    discovery_depth: i32,
    created_at: DateTime<Utc>,
}

impl SourcePageRow {
    fn into_domain(self) -> SourcePage {
        SourcePage {
            id: SourcePageId::from_uuid(self.id),
            oem_id: OemId::new(self.oem_id),
            url: self.url,
            page_type: PageType::from_db_str(&self.page_type),
            last_hash: self.last_hash,
            last_rendered_hash: self.last_rendered_hash,
            last_checked_at: self.last_checked_at,
            last_changed_at: self.last_changed_at,
            consecutive_no_change: self.consecutive_no_change.max(0) as u32,
            consecutive_not_found: self.consecutive_not_found.max(0) as u32,
            consecutive_blocked: self.consecutive_blocked.max(0) as u32,
            status: SourcePageStatus::from_db_str(&self.status),
            error_message: self.error_message,
            discovery_depth: self.discovery_depth.max(0) as u32,
            created_at: self.created_at,
        }
    }
}

impl PageRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a seed URL from config, idempotently (§3: seeds are
    /// provisioned at config load, not rediscovered).
    pub async fn ensure_seed(&self, oem_id: &OemId, url: &str, page_type: PageType) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO source_pages (id, oem_id, url, page_type, status, discovery_depth, created_at)
             VALUES ($1, $2, $3, $4, 'active', 0, now())
             ON CONFLICT (oem_id, url) DO NOTHING",
        )
        .bind(SourcePageId::new().0)
        .bind(oem_id.as_str())
        .bind(url)
        .bind(page_type.as_db_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// All active pages for `oem_id`, ordered by dispatch priority (§4.9),
    /// filtered down in-process to those actually due (`is_due` depends on
    /// the backoff multiplier, which isn't expressible as a single SQL
    /// predicate without duplicating the cadence formula).
    pub async fn get_due_pages(&self, oem_id: &OemId, now: DateTime<Utc>) -> Result<Vec<SourcePage>, StoreError> {
        let rows: Vec<SourcePageRow> = sqlx::query_as(
            "SELECT * FROM source_pages WHERE oem_id = $1 AND status = 'active'",
        )
        .bind(oem_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut pages: Vec<SourcePage> = rows
            .into_iter()
            .map(SourcePageRow::into_domain)
            .filter(|p| p.is_due(now))
            .collect();

        pages.sort_by_key(|p| p.page_type.dispatch_priority());
        Ok(pages)
    }

    /// Apply one check's outcome to a page's bookkeeping (§4.8): hash
    /// fields, change timestamp and no-change streak all move together.
    ///
    /// `not_found_threshold`/`blocked_threshold` are N/M from §4.8/§4.9: a
    /// single 404 or 403/429 never flips status on its own — only N (or M)
    /// *consecutive* matching outcomes do. Any non-matching outcome resets
    /// both counters, since recovery (a 200 after a run of 404s) means the
    /// page is evidently still there.
    pub async fn record_check(
        &self,
        page_id: SourcePageId,
        outcome: CheckOutcome,
        now: DateTime<Utc>,
        not_found_threshold: u32,
        blocked_threshold: u32,
    ) -> Result<(), StoreError> {
        match outcome {
            CheckOutcome::NoChange { raw_hash } => {
                sqlx::query(
                    "UPDATE source_pages SET last_hash = $1, last_checked_at = $2,
                        consecutive_no_change = consecutive_no_change + 1,
                        consecutive_not_found = 0, consecutive_blocked = 0,
                        status = 'active', error_message = NULL
                     WHERE id = $3",
                )
                .bind(raw_hash)
                .bind(now)
                .bind(page_id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
            CheckOutcome::RenderedNoChange { raw_hash, rendered_hash } => {
                sqlx::query(
                    "UPDATE source_pages SET last_hash = $1, last_rendered_hash = $2, last_checked_at = $3,
                        consecutive_no_change = consecutive_no_change + 1,
                        consecutive_not_found = 0, consecutive_blocked = 0,
                        status = 'active', error_message = NULL
                     WHERE id = $4",
                )
                .bind(raw_hash)
                .bind(rendered_hash)
                .bind(now)
                .bind(page_id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
            CheckOutcome::Changed { raw_hash, rendered_hash } => {
                sqlx::query(
                    "UPDATE source_pages SET last_hash = $1, last_rendered_hash = $2, last_checked_at = $3,
                        last_changed_at = $3, consecutive_no_change = 0,
                        consecutive_not_found = 0, consecutive_blocked = 0,
                        status = 'active', error_message = NULL
                     WHERE id = $4",
                )
                .bind(raw_hash)
                .bind(rendered_hash)
                .bind(now)
                .bind(page_id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
            CheckOutcome::NotFound => {
                sqlx::query(
                    "UPDATE source_pages SET last_checked_at = $1,
                        consecutive_blocked = 0,
                        consecutive_not_found = consecutive_not_found + 1,
                        status = CASE WHEN consecutive_not_found + 1 >= $2 THEN 'removed' ELSE status END
                     WHERE id = $3",
                )
                .bind(now)
                .bind(not_found_threshold as i32)
                .bind(page_id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
            CheckOutcome::Blocked => {
                sqlx::query(
                    "UPDATE source_pages SET last_checked_at = $1,
                        consecutive_not_found = 0,
                        consecutive_blocked = consecutive_blocked + 1,
                        status = CASE WHEN consecutive_blocked + 1 >= $2 THEN 'blocked' ELSE status END
                     WHERE id = $3",
                )
                .bind(now)
                .bind(blocked_threshold as i32)
                .bind(page_id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
            CheckOutcome::Error { message } => {
                sqlx::query(
                    "UPDATE source_pages SET status = 'error', error_message = $1, last_checked_at = $2,
                        consecutive_not_found = 0, consecutive_blocked = 0
                     WHERE id = $3",
                )
                .bind(message)
                .bind(now)
                .bind(page_id.0)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Clear `last_checked_at` on every active page for an OEM, so the next
    /// due-page query picks all of them up regardless of cadence (Ingress
    /// `ForceCrawlAll`, §6).
    pub async fn reset_for_recrawl(&self, oem_id: &OemId) -> Result<(), StoreError> {
        sqlx::query("UPDATE source_pages SET last_checked_at = NULL WHERE oem_id = $1 AND status = 'active'")
            .bind(oem_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Record a newly-discovered link (§4.8 Discovery): de-duplicated by
    /// (oem_id, url), bounded by `max_discovery_depth` at the call site.
    pub async fn add_discovered_link(
        &self,
        oem_id: &OemId,
        url: &str,
        page_type: PageType,
        depth: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO source_pages (id, oem_id, url, page_type, status, discovery_depth, created_at)
             VALUES ($1, $2, $3, $4, 'active', $5, now())
             ON CONFLICT (oem_id, url) DO NOTHING",
        )
        .bind(SourcePageId::new().0)
        .bind(oem_id.as_str())
        .bind(url)
        .bind(page_type.as_db_str())
        .bind(depth as i32)
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
    fn row_roundtrips_status() {
        let row = SourcePageRow {
            id: Uuid::new_v4(),
            oem_id: "ford".into(),
            url: "https://example.com".into(),
            page_type: "offers".into(),
            last_hash: None,
            last_rendered_hash: None,
            last_checked_at: None,
            last_changed_at: None,
            consecutive_no_change: 0,
            consecutive_not_found: 0,
            consecutive_blocked: 0,
            status: "blocked".into(),
            error_message: None,
            discovery_depth: 2,
            created_at: Utc::now(),
        };
        let page = row.into_domain();
        assert_eq!(page.status, SourcePageStatus::Blocked);
        assert_eq!(page.page_type, PageType::Offers);
        assert_eq!(page.discovery_depth, 2);
    }
}

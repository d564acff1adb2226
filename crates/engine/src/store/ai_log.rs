//! AI inference accounting (§4.6, §10.4): one row per LLM Router call,
//! success or failure (invariant 5 of §8).

use std::future::Future;
use std::pin::Pin;

use sqlx::PgPool;

use oemwatch_common::types::AiInferenceLog;
use oemwatch_common::OemWatchError;

use super::StoreError;
use crate::llm::LlmAccounting;

pub struct AiLogWriter {
    pool: PgPool,
}

impl AiLogWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, entry: &AiInferenceLog) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ai_inference_log
                (id, provider, model, task_type, input_tokens, output_tokens, cost_usd,
                 latency_ms, status, was_fallback, prompt_hash, response_hash, created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
        )
        .bind(entry.id.0)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(&entry.task_type)
        .bind(entry.input_tokens as i32)
        .bind(entry.output_tokens as i32)
        .bind(entry.cost_usd)
        .bind(entry.latency_ms as i64)
        .bind(entry.status.as_db_str())
        .bind(entry.was_fallback)
        .bind(&entry.prompt_hash)
        .bind(&entry.response_hash)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Sum of `cost_usd` for one model so far this calendar month, for the
    /// LLM Router's spend-cap check (§4.6).
    pub async fn month_to_date_spend(&self, model: &str) -> Result<f64, StoreError> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(cost_usd) FROM ai_inference_log
             WHERE model = $1 AND created_at >= date_trunc('month', now())",
        )
        .bind(model)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(total.unwrap_or(0.0))
    }
}

impl LlmAccounting for AiLogWriter {
    fn record<'a>(
        &'a self,
        entry: AiInferenceLog,
    ) -> Pin<Box<dyn Future<Output = Result<(), OemWatchError>> + Send + 'a>> {
        Box::pin(async move { self.record(&entry).await.map_err(OemWatchError::from) })
    }

    fn month_to_date_spend<'a>(
        &'a self,
        model: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<f64, OemWatchError>> + Send + 'a>> {
        Box::pin(async move { self.month_to_date_spend(model).await.map_err(OemWatchError::from) })
    }
}

//! Ingress control surface (§6): the small set of operations the HTTP API
//! layer drives the core with. Thin by design — every operation either
//! delegates straight to the [`Scheduler`] or reads straight from a store.

use std::sync::Arc;

use oemwatch_common::config::LlmRouterConfig;
use oemwatch_common::ids::OemId;
use oemwatch_common::types::ImportRun;
use oemwatch_common::OemWatchError;

use crate::llm::{ALL_TASKS, TASK_LLM_EXTRACTION};
use crate::scheduler::Scheduler;
use crate::store::ImportRunStore;

/// Assumed per-call token footprint for an extraction-class task, used only
/// to turn a historical call count into a dollar projection (§6
/// `GetCostEstimates`) — the router's actual `cost_for` computation uses
/// real token counts per call, this is a planning estimate, not a bill.
const ASSUMED_INPUT_TOKENS: f64 = 1500.0;
const ASSUMED_OUTPUT_TOKENS: f64 = 600.0;

/// How many recent ImportRuns to average over when projecting spend.
const COST_ESTIMATE_SAMPLE: i64 = 7;

#[derive(Clone, Debug)]
pub struct CostEstimate {
    pub oem_id: OemId,
    pub projected_daily_usd: f64,
}

/// Ingress surface (§6), backed by the Scheduler and the ImportRun store.
/// Not itself part of the crawl/extract core — it exists so the HTTP API
/// layer has one narrow thing to depend on.
pub struct Orchestrator {
    scheduler: Arc<Scheduler>,
    import_runs: Arc<ImportRunStore>,
    llm: LlmRouterConfig,
}

impl Orchestrator {
    pub fn new(scheduler: Arc<Scheduler>, import_runs: Arc<ImportRunStore>, llm: LlmRouterConfig) -> Self {
        Self { scheduler, import_runs, llm }
    }

    /// `TriggerCrawl(oem_id)` (§6).
    pub async fn trigger_crawl(&self, oem_id: &OemId) -> Result<(), OemWatchError> {
        self.scheduler.trigger_crawl(oem_id).await
    }

    /// `ForceCrawlAll(oem_id)` (§6).
    pub async fn force_crawl_all(&self, oem_id: &OemId) -> Result<(), OemWatchError> {
        self.scheduler.force_crawl_all(oem_id).await
    }

    /// `GetImportRuns(oem_id?, limit)` (§6): a single OEM's recent runs, or
    /// every configured OEM's when `oem_id` is `None`.
    pub async fn get_import_runs(&self, oem_id: Option<&OemId>, limit: i64) -> Result<Vec<ImportRun>, OemWatchError> {
        match oem_id {
            Some(id) => Ok(self.import_runs.recent(id, limit).await?),
            None => {
                let mut all = Vec::new();
                for oem in self.scheduler.configured_oems() {
                    let runs = self.import_runs.recent(&OemId::new(oem.id.clone()), limit).await?;
                    all.extend(runs);
                }
                all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
                all.truncate(limit.max(0) as usize);
                Ok(all)
            }
        }
    }

    /// `GetCostEstimates()` (§6): projected daily LLM spend per OEM, from
    /// each OEM's recent extraction-call volume and the configured
    /// `llm_extraction` task's blended per-call price. An Open Question in
    /// the design notes left the exact projection method unspecified; this
    /// is a planning number, not a billing reconciliation.
    pub async fn get_cost_estimates(&self) -> Result<Vec<CostEstimate>, OemWatchError> {
        let cost_per_call = self.blended_extraction_cost_per_call();
        let runs_per_day = 86_400.0 / self.scheduler.scheduler_config().tick_interval_secs.max(1) as f64;

        let mut estimates = Vec::new();
        for oem in self.scheduler.configured_oems() {
            let oem_id = OemId::new(oem.id.clone());
            let runs = self.import_runs.recent(&oem_id, COST_ESTIMATE_SAMPLE).await?;

            let avg_calls_per_run = if runs.is_empty() {
                0.0
            } else {
                runs.iter()
                    .map(|r| (r.counters.products_upserted + r.counters.offers_upserted) as f64)
                    .sum::<f64>()
                    / runs.len() as f64
            };

            estimates.push(CostEstimate {
                oem_id,
                projected_daily_usd: avg_calls_per_run * cost_per_call * runs_per_day,
            });
        }
        Ok(estimates)
    }

    fn blended_extraction_cost_per_call(&self) -> f64 {
        let Some(routing) = self.llm.tasks.get(TASK_LLM_EXTRACTION) else {
            return 0.0;
        };
        let Some(price) = self.llm.prices.get(&routing.primary.model) else {
            return 0.0;
        };
        (ASSUMED_INPUT_TOKENS / 1_000_000.0) * price.input_per_million_usd
            + (ASSUMED_OUTPUT_TOKENS / 1_000_000.0) * price.output_per_million_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_tasks_list_is_non_empty() {
        // Sanity check that the router's task table hasn't been emptied out
        // from under the cost estimator's assumption that llm_extraction exists.
        assert!(ALL_TASKS.contains(&TASK_LLM_EXTRACTION));
    }
}

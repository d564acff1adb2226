//! Extraction coordinator (C5, §4.5): tries strategies cheapest-first and
//! stops at the first one confident enough, recording which strategy won
//! for each (OEM, page_type) pair.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use oemwatch_common::ids::OemId;
use oemwatch_common::types::PageType;

use super::direct_api::{extract_product_from_api, ApiFieldMapping};
use super::dom_selectors::{extract_product_from_dom, SelectorHealth};
use super::llm_extraction::extract_product_via_llm;
use crate::llm::{LlmAccounting, LlmRouter};
use crate::store::ProductCandidate;

pub const CONFIDENCE_THRESHOLD: f64 = 0.75;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    DirectApi,
    DomSelectors,
    LlmExtraction,
}

pub struct ExtractionOutcome {
    pub candidate: ProductCandidate,
    pub confidence: f64,
    pub strategy: Strategy,
}

/// What one extraction attempt has available to work with. Not every
/// input is present every time: a page without a replayed API has no
/// `api_payload`, and `llm_window` is only built when both cheaper
/// strategies fall short (§4.5).
pub struct ExtractionInputs<'a> {
    pub api_payload: Option<&'a Value>,
    pub api_mapping: Option<&'a ApiFieldMapping>,
    pub rendered_html: Option<&'a str>,
    pub dom_selectors: Option<&'a HashMap<String, String>>,
    pub normalized_text: Option<&'a str>,
}

/// Tracks, per (OEM, page_type), the DOM-selector health and which
/// strategy most recently won — used to skip a selector set mid-decay and
/// to report which strategy carried the catalogue for an OEM.
#[derive(Default)]
pub struct ExtractionCoordinator {
    selector_health: Mutex<HashMap<(OemId, PageType), SelectorHealth>>,
    last_winner: Mutex<HashMap<(OemId, PageType), Strategy>>,
}

impl ExtractionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_winner(&self, oem_id: &OemId, page_type: PageType) -> Option<Strategy> {
        self.last_winner.lock().unwrap().get(&(oem_id.clone(), page_type)).copied()
    }

    /// Try Direct-API, then DOM selectors (skipped if unhealthy), then LLM
    /// extraction, stopping at the first result confident enough
    /// (§4.5). Returns `None` if every strategy fell short.
    pub async fn extract_product(
        &self,
        oem_id: &OemId,
        page_type: PageType,
        inputs: ExtractionInputs<'_>,
        router: &LlmRouter,
        accounting: &dyn LlmAccounting,
    ) -> Option<ExtractionOutcome> {
        if let (Some(payload), Some(mapping)) = (inputs.api_payload, inputs.api_mapping) {
            let (candidate, confidence) = extract_product_from_api(payload, mapping);
            if let Some(candidate) = candidate {
                if confidence >= CONFIDENCE_THRESHOLD {
                    self.record_winner(oem_id, page_type, Strategy::DirectApi);
                    return Some(ExtractionOutcome { candidate, confidence, strategy: Strategy::DirectApi });
                }
            }
        }

        if let (Some(html), Some(selectors)) = (inputs.rendered_html, inputs.dom_selectors) {
            let healthy = self.is_selector_set_healthy(oem_id, page_type);
            if healthy {
                let (candidate, confidence) = extract_product_from_dom(html, selectors);
                self.record_selector_attempt(oem_id, page_type, candidate.is_some());
                if let Some(candidate) = candidate {
                    if confidence >= CONFIDENCE_THRESHOLD {
                        self.record_winner(oem_id, page_type, Strategy::DomSelectors);
                        return Some(ExtractionOutcome { candidate, confidence, strategy: Strategy::DomSelectors });
                    }
                }
            }
        }

        if let Some(text) = inputs.normalized_text {
            let (candidate, confidence) = extract_product_via_llm(router, accounting, text).await;
            if let Some(candidate) = candidate {
                if confidence >= CONFIDENCE_THRESHOLD {
                    self.record_winner(oem_id, page_type, Strategy::LlmExtraction);
                    return Some(ExtractionOutcome { candidate, confidence, strategy: Strategy::LlmExtraction });
                }
            }
        }

        None
    }

    fn is_selector_set_healthy(&self, oem_id: &OemId, page_type: PageType) -> bool {
        self.selector_health
            .lock()
            .unwrap()
            .get(&(oem_id.clone(), page_type))
            .map(|h| h.is_healthy())
            .unwrap_or(true)
    }

    fn record_selector_attempt(&self, oem_id: &OemId, page_type: PageType, matched: bool) {
        self.selector_health
            .lock()
            .unwrap()
            .entry((oem_id.clone(), page_type))
            .or_default()
            .record(matched);
    }

    fn record_winner(&self, oem_id: &OemId, page_type: PageType, strategy: Strategy) {
        self.last_winner.lock().unwrap().insert((oem_id.clone(), page_type), strategy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_api_wins_when_confident() {
        let coordinator = ExtractionCoordinator::new();
        let mapping = ApiFieldMapping {
            external_key_path: "id".into(),
            title_path: "name".into(),
            subtitle_path: None,
            price_amount_path: None,
            price_currency_path: None,
            availability_path: None,
        };
        let payload = serde_json::json!({"id": "ranger-xlt", "name": "Ranger XLT"});
        let router = LlmRouter::new(
            oemwatch_common::config::LlmRouterConfig {
                tasks: HashMap::new(),
                prices: HashMap::new(),
                monthly_caps_usd: HashMap::new(),
                batch_eligible_tasks: vec![],
            },
            oemwatch_common::config::RetryConfig {
                max_attempts: 1,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
                backoff_multiplier: 1.0,
                jitter: false,
            },
        );
        struct NoopAccounting;
        impl LlmAccounting for NoopAccounting {
            fn record<'a>(
                &'a self,
                _entry: oemwatch_common::types::AiInferenceLog,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), oemwatch_common::OemWatchError>> + Send + 'a>> {
                Box::pin(async { Ok(()) })
            }
            fn month_to_date_spend<'a>(
                &'a self,
                _model: &'a str,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<f64, oemwatch_common::OemWatchError>> + Send + 'a>> {
                Box::pin(async { Ok(0.0) })
            }
        }

        let inputs = ExtractionInputs {
            api_payload: Some(&payload),
            api_mapping: Some(&mapping),
            rendered_html: None,
            dom_selectors: None,
            normalized_text: None,
        };

        let outcome = coordinator
            .extract_product(&OemId::new("ford"), PageType::VehicleDetail, inputs, &router, &NoopAccounting)
            .await
            .unwrap();

        assert_eq!(outcome.strategy, Strategy::DirectApi);
        assert_eq!(coordinator.last_winner(&OemId::new("ford"), PageType::VehicleDetail), Some(Strategy::DirectApi));
    }
}

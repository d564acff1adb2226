//! Extractors (C5, §4.5): turn a fetched/rendered page into semantic
//! catalogue candidates, trying cheaper strategies before falling back to
//! the LLM.

mod coordinator;
mod direct_api;
mod dom_selectors;
mod llm_extraction;

pub use coordinator::{ExtractionCoordinator, ExtractionInputs, ExtractionOutcome, Strategy, CONFIDENCE_THRESHOLD};
pub use direct_api::{extract_product_from_api, ApiFieldMapping};
pub use dom_selectors::{extract_product_from_dom, SelectorHealth};
pub use llm_extraction::extract_product_via_llm;

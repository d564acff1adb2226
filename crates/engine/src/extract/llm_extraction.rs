//! LLM extraction strategy (§4.5): last resort when Direct-API and
//! DOM-selector extraction both fall short of the confidence threshold — a
//! bounded window of normalised DOM text goes to the LLM Router under a
//! strict JSON schema.

use std::collections::HashMap;

use oemwatch_common::types::{Availability, Price};

use crate::llm::{LlmAccounting, LlmRouter, TaskRequest, TASK_LLM_EXTRACTION};
use crate::store::ProductCandidate;

/// Upper bound on how much normalised page text is sent to the model —
/// keeps the call's token cost bounded regardless of page size (§4.5).
const MAX_WINDOW_BYTES: usize = 30 * 1024;

const SYSTEM_PROMPT: &str = "You extract vehicle product data from web page text. \
Reply with a single JSON object matching this shape and nothing else: \
{\"external_key\": string, \"title\": string, \"subtitle\": string|null, \
\"price_amount\": number|null, \"price_currency\": string|null, \
\"availability\": \"available\"|\"coming_soon\"|\"run_out\"|\"discontinued\"}. \
If a field cannot be determined, use null.";

#[derive(serde::Deserialize)]
struct LlmExtractionReply {
    external_key: String,
    title: String,
    subtitle: Option<String>,
    price_amount: Option<f64>,
    price_currency: Option<String>,
    availability: Option<String>,
}

/// Run the LLM extraction strategy against a bounded window of normalised
/// text. Confidence is 0.70 on a well-formed reply, 0 on any failure — the
/// router itself already retries transient failures once before falling
/// back to the secondary model, so this makes at most one further attempt.
pub async fn extract_product_via_llm(
    router: &LlmRouter,
    accounting: &dyn LlmAccounting,
    normalized_text: &str,
) -> (Option<ProductCandidate>, f64) {
    let window = truncate_bytes(normalized_text, MAX_WINDOW_BYTES);

    let request = TaskRequest {
        task: TASK_LLM_EXTRACTION,
        system: SYSTEM_PROMPT.to_string(),
        prompt: window,
        max_tokens: 512,
        temperature: Some(0.0),
        requires_json: true,
    };

    let outcome = match router.call(request, accounting).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(%e, "LLM extraction call failed");
            return (None, 0.0);
        }
    };

    match serde_json::from_str::<LlmExtractionReply>(&outcome.text) {
        Ok(reply) => (Some(to_candidate(reply)), 0.70),
        Err(e) => {
            tracing::warn!(%e, "LLM extraction reply did not match the expected shape");
            (None, 0.0)
        }
    }
}

fn to_candidate(reply: LlmExtractionReply) -> ProductCandidate {
    ProductCandidate {
        external_key: reply.external_key,
        title: reply.title,
        subtitle: reply.subtitle,
        body_type: None,
        fuel_type: None,
        availability: reply
            .availability
            .as_deref()
            .map(parse_availability)
            .unwrap_or(Availability::Available),
        price: reply.price_amount.map(|amount| Price {
            amount_minor_units: (amount * 100.0).round() as i64,
            currency: reply.price_currency.unwrap_or_else(|| "USD".to_string()),
            price_type: "listed".to_string(),
            raw_string: amount.to_string(),
        }),
        key_features: vec![],
        variants: vec![],
        cta_links: vec![],
        meta: HashMap::new(),
    }
}

fn parse_availability(raw: &str) -> Availability {
    match raw {
        "coming_soon" => Availability::ComingSoon,
        "run_out" => Availability::RunOut,
        "discontinued" => Availability::Discontinued,
        _ => Availability::Available,
    }
}

/// Truncate at a char boundary so the window never splits a UTF-8
/// sequence.
fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_bytes_respects_char_boundaries() {
        let text = "é".repeat(20_000);
        let truncated = truncate_bytes(&text, MAX_WINDOW_BYTES);
        assert!(truncated.len() <= MAX_WINDOW_BYTES);
        assert!(truncated.is_char_boundary(truncated.len()));
    }

    #[test]
    fn parses_well_formed_reply() {
        let reply: LlmExtractionReply = serde_json::from_str(
            r#"{"external_key": "ranger-xlt", "title": "Ranger XLT", "subtitle": null,
                "price_amount": 59990.0, "price_currency": "AUD", "availability": "available"}"#,
        )
        .unwrap();
        let candidate = to_candidate(reply);
        assert_eq!(candidate.title, "Ranger XLT");
        assert_eq!(candidate.price.unwrap().amount_minor_units, 5_999_000);
    }
}

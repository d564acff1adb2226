//! API Probe & Registry (C4, §4.4): nominates candidate JSON endpoints from
//! a network trace, scores and persists them, and decides whether to
//! replay a previously-discovered endpoint ahead of a render.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;

use oemwatch_common::api::render::NetworkTrace;
use oemwatch_common::config::ApiProbeConfig;
use oemwatch_common::types::{ApiDataType, DiscoveredApi};

const PRODUCTS_KEYS: &[&str] = &["products", "vehicles", "nameplates", "configurations"];
const OFFERS_KEYS: &[&str] = &["offers", "deals"];

/// A nominated endpoint read out of a render's network trace, ready to be
/// upserted into the registry.
#[derive(Clone, Debug)]
pub struct CandidateApi {
    pub url_template: String,
    pub method: String,
    pub required_headers: HashMap<String, String>,
    pub data_type: ApiDataType,
    pub payload: Value,
}

/// Walk the observer's own pre-filtered API-candidate list, parse each body
/// as JSON, and classify its shape (§4.4 steps 1-2). Bodies that fail to
/// parse as JSON are dropped — the observer's filter is a cheap heuristic,
/// this is where we actually validate it.
pub fn extract_candidates(trace: &NetworkTrace) -> Vec<CandidateApi> {
    let by_id: HashMap<&str, _> = trace
        .requests
        .iter()
        .map(|r| (r.request_id.as_str(), r))
        .collect();

    trace
        .api_candidate_request_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .filter_map(|request| {
            let response = request.response.as_ref()?;
            let encoded = response.decoded_body_base64.as_ref()?;
            let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
            let payload: Value = serde_json::from_slice(&decoded).ok()?;

            Some(CandidateApi {
                url_template: normalize_url_template(&request.url),
                method: request.method.clone(),
                required_headers: request.request_headers.clone(),
                data_type: classify_payload(&payload),
                payload,
            })
        })
        .collect()
}

/// Classify a JSON payload's shape by a cheap heuristic: does it contain an
/// array under a recognisable key, at the top level or one level down
/// (common API envelope shapes like `{"data": {"products": [...]}}`)?
pub fn classify_payload(value: &Value) -> ApiDataType {
    if contains_array_under(value, PRODUCTS_KEYS) {
        ApiDataType::Products
    } else if contains_array_under(value, OFFERS_KEYS) {
        ApiDataType::Offers
    } else if value.get("config").is_some() || value.get("settings").is_some() {
        ApiDataType::Config
    } else if contains_array_under(value, &["media", "images", "gallery"]) {
        ApiDataType::Media
    } else {
        ApiDataType::Unknown
    }
}

fn contains_array_under(value: &Value, keys: &[&str]) -> bool {
    if let Value::Object(map) = value {
        for key in keys {
            if matches!(map.get(*key), Some(Value::Array(_))) {
                return true;
            }
        }
        // One level down, to tolerate a `{"data": {...}}` / `{"result": {...}}` envelope.
        for nested in map.values() {
            if let Value::Object(inner) = nested {
                for key in keys {
                    if matches!(inner.get(*key), Some(Value::Array(_))) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Normalise a URL into a replay template: numeric path segments become
/// `{id}`, long hex-looking segments become `{token}`, everything else
/// (brand/model slugs) is kept literal (§4.4 step 3).
pub fn normalize_url_template(raw_url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw_url) else {
        return raw_url.to_string();
    };
    parsed.set_query(None);
    parsed.set_fragment(None);

    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segs| segs.map(templatize_segment).collect())
        .unwrap_or_default();

    parsed.set_path(&format!("/{}", segments.join("/")));
    parsed.to_string()
}

fn templatize_segment(segment: &str) -> String {
    if segment.is_empty() {
        return segment.to_string();
    }
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return "{id}".to_string();
    }
    let is_hex_token = segment.len() >= 16 && segment.chars().all(|c| c.is_ascii_hexdigit());
    if is_hex_token {
        return "{token}".to_string();
    }
    segment.to_string()
}

/// Update `api` after a successful replay (§4.4): reliability climbs
/// multiplicatively toward 1.0, failure streak clears.
pub fn record_success(api: &mut DiscoveredApi, config: &ApiProbeConfig) {
    api.reliability_score = (api.reliability_score * config.success_multiplier).min(1.0);
    api.last_success_at = Some(Utc::now());
    api.consecutive_failures = 0;
}

/// Update `api` after a failed replay; retires the endpoint once it crosses
/// either threshold (§4.4).
pub fn record_failure(api: &mut DiscoveredApi, config: &ApiProbeConfig) {
    api.reliability_score *= config.failure_multiplier;
    api.last_failure_at = Some(Utc::now());
    api.consecutive_failures += 1;

    if api.consecutive_failures >= config.retire_after_consecutive_failures
        || api.reliability_score < config.retire_below_score
    {
        api.status = oemwatch_common::types::DiscoveredApiStatus::Retired;
    }
}

/// Whether `api` should be replayed ahead of a render this crawl (§4.4
/// Replay decision): active, reliable enough, and not presently cooling
/// down after a recent failure.
pub fn should_replay(api: &DiscoveredApi, config: &ApiProbeConfig, cooldown: Duration, now: DateTime<Utc>) -> bool {
    if !api.is_replay_eligible(config.min_reliability_to_replay) {
        return false;
    }
    match api.last_failure_at {
        Some(failed_at) => (now - failed_at).to_std().map(|d| d >= cooldown).unwrap_or(true),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_products_array() {
        let payload = serde_json::json!({"nameplates": [{"id": 1}]});
        assert_eq!(classify_payload(&payload), ApiDataType::Products);
    }

    #[test]
    fn classifies_nested_offers_envelope() {
        let payload = serde_json::json!({"data": {"deals": []}});
        assert_eq!(classify_payload(&payload), ApiDataType::Offers);
    }

    #[test]
    fn classifies_unknown_shape() {
        let payload = serde_json::json!({"foo": "bar"});
        assert_eq!(classify_payload(&payload), ApiDataType::Unknown);
    }

    #[test]
    fn templatizes_numeric_and_hex_segments() {
        let url = normalize_url_template("https://Example.com/api/v1/vehicles/4821/configs/9f8a7b6c5d4e3f2a1b0c9d8e7f6a5b4c");
        assert_eq!(url, "https://example.com/api/v1/vehicles/{id}/configs/{token}");
    }

    #[test]
    fn keeps_model_slug_literal() {
        let url = normalize_url_template("https://example.com/api/ranger/specs");
        assert_eq!(url, "https://example.com/api/ranger/specs");
    }

    #[test]
    fn reliability_climbs_on_success_and_decays_on_failure() {
        let mut api = DiscoveredApi::new(
            oemwatch_common::ids::OemId::new("ford"),
            "https://example.com/api/{id}".into(),
            "GET".into(),
            ApiDataType::Products,
        );
        let config = ApiProbeConfig::default();
        record_success(&mut api, &config);
        assert!(api.reliability_score > 0.5);
        record_failure(&mut api, &config);
        assert!(api.reliability_score < 0.525);
    }

    #[test]
    fn retires_after_consecutive_failures() {
        let mut api = DiscoveredApi::new(
            oemwatch_common::ids::OemId::new("ford"),
            "https://example.com/api/{id}".into(),
            "GET".into(),
            ApiDataType::Products,
        );
        let config = ApiProbeConfig::default();
        for _ in 0..config.retire_after_consecutive_failures {
            record_failure(&mut api, &config);
        }
        assert_eq!(api.status, oemwatch_common::types::DiscoveredApiStatus::Retired);
    }
}

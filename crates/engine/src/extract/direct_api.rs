//! Direct-API extraction strategy (§4.5): a declarative dot-path mapping
//! pulls product fields straight out of a DiscoveredApi payload, no parsing
//! of markup at all.

use std::collections::HashMap;

use serde_json::Value;

use oemwatch_common::types::{Availability, Price};

use crate::store::ProductCandidate;

/// One OEM's field -> dot-path mapping for one payload shape, read out of
/// `OemConfig.api_mappings` (§3).
#[derive(Clone, Debug, serde::Deserialize)]
pub struct ApiFieldMapping {
    pub external_key_path: String,
    pub title_path: String,
    #[serde(default)]
    pub subtitle_path: Option<String>,
    #[serde(default)]
    pub price_amount_path: Option<String>,
    #[serde(default)]
    pub price_currency_path: Option<String>,
    #[serde(default)]
    pub availability_path: Option<String>,
}

/// Resolve one payload against a mapping. Confidence is 0.95 when every
/// configured optional field resolved, 0.40 when only the required
/// external_key/title resolved, 0 when even those are missing (§4.5).
pub fn extract_product_from_api(payload: &Value, mapping: &ApiFieldMapping) -> (Option<ProductCandidate>, f64) {
    let Some(external_key) = resolve_str(payload, &mapping.external_key_path) else {
        return (None, 0.0);
    };
    let Some(title) = resolve_str(payload, &mapping.title_path) else {
        return (None, 0.0);
    };

    let subtitle = mapping.subtitle_path.as_deref().and_then(|p| resolve_str(payload, p));
    let price = mapping.price_amount_path.as_deref().and_then(|p| {
        let amount = resolve_f64(payload, p)?;
        let currency = mapping
            .price_currency_path
            .as_deref()
            .and_then(|c| resolve_str(payload, c))
            .unwrap_or_else(|| "USD".to_string());
        Some(Price {
            amount_minor_units: (amount * 100.0).round() as i64,
            currency,
            price_type: "listed".to_string(),
            raw_string: amount.to_string(),
        })
    });
    let availability_raw = mapping.availability_path.as_deref().and_then(|p| resolve_str(payload, p));

    let configured = [
        mapping.subtitle_path.is_some(),
        mapping.price_amount_path.is_some(),
        mapping.availability_path.is_some(),
    ]
    .iter()
    .filter(|c| **c)
    .count();
    let resolved = [subtitle.is_some(), price.is_some(), availability_raw.is_some()]
        .iter()
        .filter(|r| **r)
        .count();

    let confidence = if configured == 0 || resolved == configured { 0.95 } else { 0.40 };

    let candidate = ProductCandidate {
        external_key,
        title,
        subtitle,
        body_type: None,
        fuel_type: None,
        availability: availability_raw.map(|s| parse_availability(&s)).unwrap_or(Availability::Available),
        price,
        key_features: vec![],
        variants: vec![],
        cta_links: vec![],
        meta: HashMap::new(),
    };

    (Some(candidate), confidence)
}

fn resolve_str(value: &Value, path: &str) -> Option<String> {
    resolve_path(value, path).and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn resolve_f64(value: &Value, path: &str) -> Option<f64> {
    resolve_path(value, path).and_then(|v| v.as_f64())
}

/// Dot-path resolution (`"data.price.amount"`), no wildcards or array
/// indexing — OEM API payload shapes in practice are flat enough not to
/// need them.
fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |acc, segment| acc.get(segment))
}

fn parse_availability(raw: &str) -> Availability {
    match raw.to_lowercase().as_str() {
        "coming_soon" | "coming-soon" => Availability::ComingSoon,
        "run_out" | "sold_out" => Availability::RunOut,
        "discontinued" => Availability::Discontinued,
        _ => Availability::Available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> ApiFieldMapping {
        ApiFieldMapping {
            external_key_path: "id".into(),
            title_path: "name".into(),
            subtitle_path: Some("trim".into()),
            price_amount_path: Some("price.amount".into()),
            price_currency_path: Some("price.currency".into()),
            availability_path: Some("status".into()),
        }
    }

    #[test]
    fn full_match_is_high_confidence() {
        let payload = serde_json::json!({
            "id": "ranger-xlt", "name": "Ranger XLT", "trim": "XLT",
            "price": {"amount": 59990.0, "currency": "AUD"}, "status": "available"
        });
        let (candidate, confidence) = extract_product_from_api(&payload, &mapping());
        assert!(candidate.is_some());
        assert_eq!(confidence, 0.95);
    }

    #[test]
    fn partial_match_is_medium_confidence() {
        let payload = serde_json::json!({"id": "ranger-xlt", "name": "Ranger XLT"});
        let (candidate, confidence) = extract_product_from_api(&payload, &mapping());
        assert!(candidate.is_some());
        assert_eq!(confidence, 0.40);
    }

    #[test]
    fn missing_required_field_is_zero_confidence() {
        let payload = serde_json::json!({"name": "Ranger XLT"});
        let (candidate, confidence) = extract_product_from_api(&payload, &mapping());
        assert!(candidate.is_none());
        assert_eq!(confidence, 0.0);
    }
}

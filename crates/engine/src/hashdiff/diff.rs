use std::collections::HashMap;

use serde_json::Value;

use oemwatch_common::types::{ChangeEventType, FieldDiff, Severity};

/// Top-level object diff between two canonical snapshots: `field -> {from,
/// to}` for every key whose value differs (§4.1). Sequences (`variants`,
/// `key_features`) are compared as a whole unit rather than element-wise —
/// any reorder, insertion or deletion surfaces as one `FieldDiff` on that
/// key, which still satisfies "diff is non-empty and agrees with the
/// canonicalise difference" (invariant 6 of §8).
pub fn diff_values(prev: &Value, new: &Value) -> HashMap<String, FieldDiff> {
    let mut diff = HashMap::new();
    let (Value::Object(p), Value::Object(n)) = (prev, new) else {
        return diff;
    };

    let mut keys: Vec<&String> = p.keys().chain(n.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let pv = p.get(key).cloned().unwrap_or(Value::Null);
        let nv = n.get(key).cloned().unwrap_or(Value::Null);
        if pv != nv {
            diff.insert(key.clone(), FieldDiff { from: pv, to: nv });
        }
    }

    diff
}

const COSMETIC_FIELDS: &[&str] = &["subtitle"];
const IMAGE_FIELDS: &[&str] = &["image", "images", "hero_image", "gallery"];

/// Assign `(event_type, severity)` for a Product update given its field
/// diff (§4.1 severity assignment rules).
pub fn assign_product_event(
    diff: &HashMap<String, FieldDiff>,
    critical_fields: &[String],
) -> (ChangeEventType, Severity) {
    if diff.is_empty() {
        return (ChangeEventType::Updated, Severity::Low);
    }

    let mut severity = Severity::Low;
    let mut event_type = ChangeEventType::Updated;

    if let Some(price_diff) = diff.get("price") {
        severity = Severity::Medium;
        event_type = ChangeEventType::PriceChanged;
        if price_crossed_threshold(price_diff) {
            severity = Severity::High;
        }
    }

    if let Some(avail_diff) = diff.get("availability") {
        let from = avail_diff.from.as_str().unwrap_or("");
        let to = avail_diff.to.as_str().unwrap_or("");
        if is_run_out_or_discontinued(from) != is_run_out_or_discontinued(to) {
            severity = severity.max(Severity::High);
            event_type = ChangeEventType::AvailabilityChanged;
        }
    }

    if only_cosmetic_or_image_fields(diff) {
        severity = Severity::Low;
    }

    for field in critical_fields {
        if diff.contains_key(field) {
            severity = severity.bump();
        }
    }

    (event_type, severity)
}

/// Assign `(event_type, severity)` for an Offer update (§4.1: "validity_end
/// change bringing an offer live or dead ⇒ high").
pub fn assign_offer_event(
    diff: &HashMap<String, FieldDiff>,
    critical_fields: &[String],
) -> (ChangeEventType, Severity) {
    if diff.is_empty() {
        return (ChangeEventType::Updated, Severity::Low);
    }

    let mut severity = Severity::Medium;
    let mut event_type = ChangeEventType::Updated;

    if diff.contains_key("validity_end") || diff.contains_key("validity_start") {
        severity = Severity::High;
        event_type = ChangeEventType::ValidityChanged;
    }

    if diff.contains_key("saving_amount") {
        event_type = ChangeEventType::PriceChanged;
        severity = severity.max(Severity::Medium);
    }

    if only_cosmetic_or_image_fields(diff) {
        severity = Severity::Low;
    }

    for field in critical_fields {
        if diff.contains_key(field) {
            severity = severity.bump();
        }
    }

    (event_type, severity)
}

fn price_crossed_threshold(diff: &FieldDiff) -> bool {
    let from = extract_amount(&diff.from);
    let to = extract_amount(&diff.to);
    match (from, to) {
        (Some(from), Some(to)) => {
            let delta = (to - from).abs();
            // $1000 expressed in minor units (cents).
            let pct = if from != 0 { delta as f64 / from as f64 } else { 1.0 };
            pct > 0.05 || delta > 100_000
        }
        _ => true,
    }
}

fn extract_amount(value: &Value) -> Option<i64> {
    value.get("amount_minor_units").and_then(|v| v.as_i64())
}

fn is_run_out_or_discontinued(s: &str) -> bool {
    matches!(s, "run_out" | "discontinued")
}

fn only_cosmetic_or_image_fields(diff: &HashMap<String, FieldDiff>) -> bool {
    diff.keys()
        .all(|k| COSMETIC_FIELDS.contains(&k.as_str()) || IMAGE_FIELDS.contains(&k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diff_on_identical_values() {
        let v = serde_json::json!({"a": 1, "b": "x"});
        assert!(diff_values(&v, &v).is_empty());
    }

    #[test]
    fn availability_transition_to_run_out_is_high() {
        let mut diff = HashMap::new();
        diff.insert(
            "availability".to_string(),
            FieldDiff {
                from: Value::String("available".into()),
                to: Value::String("run_out".into()),
            },
        );
        let (event_type, severity) = assign_product_event(&diff, &[]);
        assert_eq!(severity, Severity::High);
        assert_eq!(event_type, ChangeEventType::AvailabilityChanged);
    }

    #[test]
    fn critical_field_bumps_one_level() {
        let mut diff = HashMap::new();
        diff.insert(
            "body_type".to_string(),
            FieldDiff {
                from: Value::String("suv".into()),
                to: Value::String("ute".into()),
            },
        );
        let (_, severity) = assign_product_event(&diff, &["body_type".to_string()]);
        assert_eq!(severity, Severity::Medium);
    }

    #[test]
    fn cosmetic_only_change_is_low() {
        let mut diff = HashMap::new();
        diff.insert(
            "subtitle".to_string(),
            FieldDiff {
                from: Value::String("old".into()),
                to: Value::String("new".into()),
            },
        );
        let (_, severity) = assign_product_event(&diff, &[]);
        assert_eq!(severity, Severity::Low);
    }
}

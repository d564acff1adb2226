use serde_json::Value;
use sha2::{Digest, Sha256};

use oemwatch_common::normalize::{collapse_whitespace, extract_normalized_text};
use oemwatch_common::types::{Offer, Product};

/// SHA-256 over `body`, the HTTP response bytes before rendering — the
/// `raw_hash` half of the two-level page hash (§4.1).
pub fn raw_hash(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

/// SHA-256 over the normalised DOM text of a rendered page — the
/// `rendered_hash` half of the two-level page hash (§4.1).
pub fn rendered_hash(html: &str) -> String {
    let text = extract_normalized_text(html);
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// SHA-256 over a canonical `Value`'s bytes, lowercase hex.
pub fn content_hash(canonical: &Value) -> String {
    // serde_json::Value's object variant is a BTreeMap (the `preserve_order`
    // feature is not enabled), so serialisation is already key-sorted —
    // this is the "all mappings sorted by key" rule for free.
    let bytes = serde_json::to_vec(canonical).expect("canonical value always serializes");
    format!("{:x}", Sha256::digest(&bytes))
}

/// Canonicalise a Product into the bytewise-stable form used for hashing
/// and diffing (§4.1). Volatile bookkeeping fields (`id`, `content_hash`,
/// `first_seen_at`, `last_seen_at`) are excluded — they never participate
/// in the identity of "has this product's content changed".
pub fn canonicalize_product(p: &Product) -> Value {
    let price = p.price.as_ref().map(canonical_price);
    let variants: Vec<Value> = {
        let mut vs: Vec<_> = p.variants.iter().collect();
        // Variants are order-significant; an explicit sort_order wins when
        // present, otherwise discovery order is preserved (§4.1).
        vs.sort_by_key(|v| v.sort_order.unwrap_or(i32::MAX));
        vs.into_iter()
            .map(|v| {
                serde_json::json!({
                    "external_key": v.external_key,
                    "title": v.title.as_deref().map(collapse_whitespace),
                    "price": v.price.as_ref().map(canonical_price),
                })
            })
            .collect()
    };

    let key_features: Vec<Value> = p
        .key_features
        .iter()
        .map(|f| {
            serde_json::json!({
                "label": collapse_whitespace(&f.label),
                "value": f.value.as_deref().map(collapse_whitespace),
            })
        })
        .collect();

    let cta_links: Vec<Value> = p
        .cta_links
        .iter()
        .map(|c| {
            serde_json::json!({
                "label": collapse_whitespace(&c.label),
                "url": normalize_url(&c.url),
            })
        })
        .collect();

    let mut meta: Vec<(String, Value)> = p.meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    meta.sort_by(|a, b| a.0.cmp(&b.0));

    serde_json::json!({
        "oem_id": p.oem_id.as_str(),
        "external_key": p.external_key,
        "title": collapse_whitespace(&p.title),
        "subtitle": p.subtitle.as_deref().map(collapse_whitespace),
        "body_type": p.body_type.as_deref().map(collapse_whitespace),
        "fuel_type": p.fuel_type.as_deref().map(collapse_whitespace),
        "availability": p.availability.as_db_str(),
        "price": price,
        "key_features": key_features,
        "variants": variants,
        "cta_links": cta_links,
        "meta": meta.into_iter().collect::<serde_json::Map<_, _>>(),
    })
}

/// Canonicalise an Offer the same way (§4.1; Offer is "analogous to
/// Product").
pub fn canonicalize_offer(o: &Offer) -> Value {
    let mut meta: Vec<(String, Value)> = o.meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    meta.sort_by(|a, b| a.0.cmp(&b.0));

    serde_json::json!({
        "oem_id": o.oem_id.as_str(),
        "external_key": o.external_key,
        "offer_type": o.offer_type,
        "applicable_models": o.applicable_models,
        "validity_start": o.validity_start.map(|t| t.to_rfc3339()),
        "validity_end": o.validity_end.map(|t| t.to_rfc3339()),
        "saving_amount": o.saving_amount.as_ref().map(canonical_price),
        "meta": meta.into_iter().collect::<serde_json::Map<_, _>>(),
    })
}

fn canonical_price(price: &oemwatch_common::types::Price) -> Value {
    serde_json::json!({
        "amount_minor_units": price.amount_minor_units,
        "currency": price.currency.to_uppercase(),
        "price_type": price.price_type,
    })
}

/// Lowercase scheme+host, leave the path percent-encoded as given (§4.1).
fn normalize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let _ = parsed.set_scheme(&parsed.scheme().to_lowercase());
            if let Some(host) = parsed.host_str() {
                let host = host.to_lowercase();
                let _ = parsed.set_host(Some(&host));
            }
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

//! Hash/Diff Engine (C1, §4.1): canonicalisation, two-level content hashing
//! for pages, and typed diffing with severity assignment for catalogue
//! entities.

mod canonicalize;
mod diff;

pub use canonicalize::{canonicalize_offer, canonicalize_product, content_hash, raw_hash, rendered_hash};
pub use diff::{assign_offer_event, assign_product_event, diff_values};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oemwatch_common::ids::{OemId, ProductId};
    use oemwatch_common::types::{Availability, Product};
    use std::collections::HashMap;

    fn sample_product(price_minor: i64) -> Product {
        Product {
            id: ProductId::new(),
            oem_id: OemId::new("ford"),
            external_key: "ranger-xlt".into(),
            title: "Ranger XLT".into(),
            subtitle: None,
            body_type: Some("ute".into()),
            fuel_type: Some("diesel".into()),
            availability: Availability::Available,
            price: Some(oemwatch_common::types::Price {
                amount_minor_units: price_minor,
                currency: "AUD".into(),
                price_type: "drive_away".into(),
                raw_string: format!("${}", price_minor / 100),
            }),
            key_features: vec![],
            variants: vec![],
            cta_links: vec![],
            meta: HashMap::new(),
            content_hash: String::new(),
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
        }
    }

    #[test]
    fn canonicalisation_is_order_independent() {
        // Two equal products serialize to the same canonical bytes
        // regardless of field construction order (invariant 2 of §8).
        let p1 = sample_product(5_999_000);
        let p2 = p1.clone();
        let c1 = canonicalize_product(&p1);
        let c2 = canonicalize_product(&p2);
        assert_eq!(content_hash(&c1), content_hash(&c2));
    }

    #[test]
    fn digest_is_pure_function_of_canonical_form() {
        let p = sample_product(5_999_000);
        let c = canonicalize_product(&p);
        assert_eq!(content_hash(&c), content_hash(&c));
    }

    #[test]
    fn price_bump_over_five_percent_is_high_severity() {
        let before = canonicalize_product(&sample_product(5_999_000));
        let after = canonicalize_product(&sample_product(6_499_000));
        let diff = diff_values(&before, &after);
        assert!(!diff.is_empty());
        let (_, severity) = assign_product_event(&diff, &[]);
        assert_eq!(severity, oemwatch_common::types::Severity::High);
    }

    #[test]
    fn small_price_change_is_medium_severity() {
        let before = canonicalize_product(&sample_product(5_999_000));
        let after = canonicalize_product(&sample_product(6_020_000));
        let diff = diff_values(&before, &after);
        let (_, severity) = assign_product_event(&diff, &[]);
        assert_eq!(severity, oemwatch_common::types::Severity::Medium);
    }

    #[test]
    fn raw_hash_is_stable_for_identical_bytes() {
        let body = b"<html>hello</html>";
        assert_eq!(raw_hash(body), raw_hash(body));
    }

    #[test]
    fn rendered_hash_ignores_script_content() {
        let a = "<html><body><script>x()</script><p>Hello</p></body></html>";
        let b = "<html><body><script>y()</script><p>Hello</p></body></html>";
        assert_eq!(rendered_hash(a), rendered_hash(b));
    }
}

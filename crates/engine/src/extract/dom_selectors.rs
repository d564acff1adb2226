//! DOM-selector extraction strategy (§4.5): a per-OEM CSS selector map read
//! off the rendered page, with a rolling health tracker so selectors that
//! have stopped matching (an OEM redesign) are skipped rather than retried
//! every crawl.

use std::collections::{HashMap, VecDeque};

use scraper::{Html, Selector};

use oemwatch_common::types::Availability;

use crate::store::ProductCandidate;

const REQUIRED_FIELDS: &[&str] = &["title"];
const OPTIONAL_FIELDS: &[&str] = &["subtitle", "price", "availability"];

/// Rolling trailing-success-rate tracker for one (OEM, page_type) selector
/// set; a set below 0.5 over its last window is skipped in favour of the
/// next strategy rather than spending a render on markup that no longer
/// matches (§4.5 selector health).
#[derive(Default)]
pub struct SelectorHealth {
    window: VecDeque<bool>,
}

const HEALTH_WINDOW: usize = 20;

impl SelectorHealth {
    pub fn record(&mut self, matched: bool) {
        self.window.push_back(matched);
        if self.window.len() > HEALTH_WINDOW {
            self.window.pop_front();
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let hits = self.window.iter().filter(|m| **m).count();
        hits as f64 / self.window.len() as f64
    }

    pub fn is_healthy(&self) -> bool {
        self.success_rate() >= 0.5
    }
}

/// Extract a product from rendered HTML using a field -> CSS selector map.
/// Confidence is the fraction of required-plus-optional fields that
/// actually matched (§4.5).
pub fn extract_product_from_dom(html: &str, selectors: &HashMap<String, String>) -> (Option<ProductCandidate>, f64) {
    let document = Html::parse_document(html);

    let mut matched = HashMap::new();
    for (field, selector_str) in selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).next() {
                let text = el.text().collect::<Vec<_>>().join(" ").trim().to_string();
                if !text.is_empty() {
                    matched.insert(field.clone(), text);
                }
            }
        }
    }

    let Some(title) = matched.get("title").cloned() else {
        return (None, 0.0);
    };

    let total_fields = REQUIRED_FIELDS.len() + OPTIONAL_FIELDS.len();
    let populated = REQUIRED_FIELDS
        .iter()
        .chain(OPTIONAL_FIELDS.iter())
        .filter(|f| matched.contains_key(**f))
        .count();
    let confidence = populated as f64 / total_fields as f64;

    let price = matched.get("price").and_then(|raw| parse_price(raw));
    let availability = matched
        .get("availability")
        .map(|raw| parse_availability(raw))
        .unwrap_or(Availability::Available);

    let candidate = ProductCandidate {
        external_key: slugify(&title),
        title,
        subtitle: matched.get("subtitle").cloned(),
        body_type: None,
        fuel_type: None,
        availability,
        price,
        key_features: vec![],
        variants: vec![],
        cta_links: vec![],
        meta: HashMap::new(),
    };

    (Some(candidate), confidence)
}

fn parse_price(raw: &str) -> Option<oemwatch_common::types::Price> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    let amount: f64 = digits.parse().ok()?;
    Some(oemwatch_common::types::Price {
        amount_minor_units: (amount * 100.0).round() as i64,
        currency: "USD".to_string(),
        price_type: "listed".to_string(),
        raw_string: raw.to_string(),
    })
}

fn parse_availability(raw: &str) -> Availability {
    let lower = raw.to_lowercase();
    if lower.contains("coming soon") {
        Availability::ComingSoon
    } else if lower.contains("sold out") || lower.contains("run out") {
        Availability::RunOut
    } else if lower.contains("discontinued") {
        Availability::Discontinued
    } else {
        Availability::Available
    }
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_price() {
        let html = r#"<html><body><h1 class="title">Ranger XLT</h1><span class="price">$59,990</span></body></html>"#;
        let mut selectors = HashMap::new();
        selectors.insert("title".to_string(), ".title".to_string());
        selectors.insert("price".to_string(), ".price".to_string());

        let (candidate, confidence) = extract_product_from_dom(html, &selectors);
        let candidate = candidate.unwrap();
        assert_eq!(candidate.title, "Ranger XLT");
        assert_eq!(candidate.price.unwrap().amount_minor_units, 5_999_000);
        assert!(confidence > 0.0);
    }

    #[test]
    fn missing_title_selector_yields_no_candidate() {
        let html = "<html><body><span class=\"price\">$1</span></body></html>";
        let mut selectors = HashMap::new();
        selectors.insert("price".to_string(), ".price".to_string());
        let (candidate, confidence) = extract_product_from_dom(html, &selectors);
        assert!(candidate.is_none());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn health_tracker_flags_low_success_rate() {
        let mut health = SelectorHealth::default();
        for _ in 0..15 {
            health.record(false);
        }
        for _ in 0..5 {
            health.record(true);
        }
        assert!(!health.is_healthy());
    }
}

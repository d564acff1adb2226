//! DOM-to-text normalisation shared by the Headless Renderer (whose
//! network-observer capture is over raw HTML) and the engine's Hash/Diff
//! Engine (which hashes the normalised text, not the markup) — see §4.1
//! "rendered_hash is over the normalised DOM text extracted from the
//! rendered page (script/style/nav stripped, whitespace collapsed,
//! elements in document order)".

use std::collections::HashSet;

use scraper::{Html, Selector};

const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "noscript", "svg"];

/// Strips script/style/nav/footer/header/noscript/svg subtrees and
/// collapses whitespace, preserving document order.
pub fn extract_normalized_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut skip_ids = HashSet::new();
    for tag in SKIPPED_TAGS {
        if let Ok(selector) = Selector::parse(tag) {
            for el in document.select(&selector) {
                for descendant in el.descendants() {
                    skip_ids.insert(descendant.id());
                }
            }
        }
    }

    let mut text = String::new();
    for node in document.tree.nodes() {
        if skip_ids.contains(&node.id()) {
            continue;
        }
        if let Some(t) = node.value().as_text() {
            text.push_str(t);
            text.push(' ');
        }
    }

    collapse_whitespace(&text)
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style() {
        let html = "<html><body><script>evil()</script><style>.x{}</style><p>Hello   world</p></body></html>";
        let text = extract_normalized_text(html);
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(collapse_whitespace("a   b\n\tc"), "a b c");
    }

    #[test]
    fn preserves_document_order() {
        let html = "<html><body><p>first</p><p>second</p></body></html>";
        assert_eq!(extract_normalized_text(html), "first second");
    }
}

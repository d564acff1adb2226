use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::fetch::FetchOutcome;

/// Simple in-memory URL response cache with TTL-based expiration, keyed on
/// the requested URL (not the post-redirect final URL).
pub struct UrlCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

struct CacheEntry {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    final_url: String,
    inserted_at: Instant,
}

impl UrlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, url: &str) -> Option<FetchOutcome> {
        if let Some(entry) = self.entries.get(url) {
            if entry.inserted_at.elapsed() < self.ttl {
                metrics::counter!("fetch.cache.hit").increment(1);
                return Some(FetchOutcome {
                    status: entry.status,
                    headers: entry.headers.clone(),
                    body: entry.body.clone(),
                    final_url: entry.final_url.clone(),
                    elapsed_ms: 0,
                });
            }
        }
        metrics::counter!("fetch.cache.miss").increment(1);
        None
    }

    /// Insert a response into the cache, evicting expired entries.
    pub fn insert(&mut self, url: String, outcome: &FetchOutcome) {
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);

        self.entries.insert(
            url,
            CacheEntry {
                status: outcome.status,
                headers: outcome.headers.clone(),
                body: outcome.body.clone(),
                final_url: outcome.final_url.clone(),
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(body: &str) -> FetchOutcome {
        FetchOutcome {
            status: 200,
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
            final_url: "https://example.com".into(),
            elapsed_ms: 5,
        }
    }

    #[test]
    fn test_cache_hit_miss() {
        let mut cache = UrlCache::new(Duration::from_secs(3600));
        assert!(cache.get("https://example.com").is_none());

        cache.insert("https://example.com".into(), &outcome("content"));

        let hit = cache.get("https://example.com").unwrap();
        assert_eq!(hit.body, b"content");
        assert_eq!(hit.status, 200);
    }

    #[test]
    fn test_cache_expiry() {
        let mut cache = UrlCache::new(Duration::from_millis(1));
        cache.insert("https://example.com".into(), &outcome("old"));

        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("https://example.com").is_none());
    }
}

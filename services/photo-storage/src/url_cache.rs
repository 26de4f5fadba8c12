//! In-process cache for signed retrieval URLs.
//!
//! Entries live strictly shorter than the backend signature they hold: the
//! local TTL is the signature lifetime minus a safety margin, so the cache
//! never serves a URL the backend would reject as expired. State is
//! process-local; multiple instances each hold an independent cache and the
//! worst case is a redundant re-sign.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct CachedUrl {
    url: String,
    expires_at: Instant,
}

/// Signed-URL cache keyed by object key.
pub struct UrlCache {
    margin: Duration,
    entries: RwLock<HashMap<String, CachedUrl>>,
}

impl UrlCache {
    /// `margin` is subtracted from every signature lifetime to form the
    /// local TTL.
    pub fn new(margin: Duration) -> Self {
        Self {
            margin,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached URL for `key` if its local TTL has not elapsed.
    /// Expired entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if Instant::now() < entry.expires_at => {
                    return Some(entry.url.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.entries.write().remove(key);
        None
    }

    /// Cache `url` for `key`. `signature_ttl` is the backend signature's
    /// lifetime; a lifetime at or below the margin is not cached at all.
    pub fn insert(&self, key: &str, url: String, signature_ttl: Duration) {
        let local_ttl = signature_ttl.saturating_sub(self.margin);
        if local_ttl.is_zero() {
            return;
        }

        self.entries.write().insert(
            key.to_string(),
            CachedUrl {
                url,
                expires_at: Instant::now() + local_ttl,
            },
        );
    }

    /// Drop the entry for `key`, if any.
    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_local_ttl() {
        let cache = UrlCache::new(Duration::from_secs(60));
        cache.insert("k1", "https://signed.example/k1".to_string(), Duration::from_secs(3600));

        assert_eq!(
            cache.get("k1").as_deref(),
            Some("https://signed.example/k1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_signature_ttl_minus_margin() {
        let cache = UrlCache::new(Duration::from_secs(60));
        cache.insert("k1", "https://signed.example/k1".to_string(), Duration::from_secs(120));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k1").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signature_shorter_than_margin_is_not_cached() {
        let cache = UrlCache::new(Duration::from_secs(60));
        cache.insert("k1", "https://signed.example/k1".to_string(), Duration::from_secs(45));

        assert!(cache.get("k1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_evicts_immediately() {
        let cache = UrlCache::new(Duration::from_secs(60));
        cache.insert("k1", "https://signed.example/k1".to_string(), Duration::from_secs(3600));

        cache.remove("k1");
        assert!(cache.get("k1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_is_a_clean_miss() {
        let cache = UrlCache::new(Duration::from_secs(60));
        assert!(cache.get("absent").is_none());
    }
}

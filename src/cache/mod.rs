use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::query::period::RangeKeyword;

/// Whether and for how long to cache one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachePolicyDecision {
    pub cacheable: bool,
    pub ttl_seconds: u64,
}

/// `today` is still moving and custom ranges are user-specific; neither is cached.
pub fn should_cache(range: &RangeKeyword, has_custom_dates: bool) -> bool {
    !has_custom_dates && *range != RangeKeyword::Today
}

/// TTL grows with how settled the range's data is.
pub fn ttl_seconds(range: &RangeKeyword, has_custom_dates: bool) -> u64 {
    if has_custom_dates {
        return 900;
    }
    match range {
        RangeKeyword::Today | RangeKeyword::Yesterday => 600,
        RangeKeyword::ThisWeek | RangeKeyword::LastWeek | RangeKeyword::Last7Days => 900,
        RangeKeyword::ThisMonth | RangeKeyword::Last30Days => 1800,
        RangeKeyword::LastMonth
        | RangeKeyword::ThisQuarter
        | RangeKeyword::LastQuarter
        | RangeKeyword::Quarter(_) => 3600,
        RangeKeyword::ThisYear | RangeKeyword::LastYear => 7200,
        RangeKeyword::Unknown(_) => 900,
    }
}

pub fn decide(range: &RangeKeyword, has_custom_dates: bool) -> CachePolicyDecision {
    CachePolicyDecision {
        cacheable: should_cache(range, has_custom_dates),
        ttl_seconds: ttl_seconds(range, has_custom_dates),
    }
}

/// Deterministic key for a namespace and a parameter bag.
///
/// Pairs are sorted by key and empty values are dropped before hashing, so
/// insertion order and blank parameters never change the key.
pub fn cache_key<I, K, V>(namespace: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let sorted: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    let canonical = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    format!("{namespace}:{:x}", hasher.finalize())
}

/// Shared-cache directive with a stale-while-revalidate window of twice the TTL.
pub fn cache_control_header(ttl_seconds: u64) -> String {
    format!(
        "public, s-maxage={ttl_seconds}, stale-while-revalidate={}",
        ttl_seconds * 2
    )
}

/// Key/value store for memoized results.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration, tags: &[String]);
    /// Drop one key. Returns whether it was present.
    fn invalidate(&self, key: &str) -> bool;
    /// Drop every entry carrying `tag`. Returns the number removed.
    fn invalidate_by_tag(&self, tag: &str) -> usize;
}

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
    tags: Vec<String>,
}

/// Process-wide in-memory store with per-entry expiry. Expired entries are
/// dropped on read and swept on every write.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let value = {
            let entry = self.entries.get(key)?;
            (entry.expires_at > now).then(|| entry.value.clone())
        };
        if value.is_none() {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        value
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration, tags: &[String]) {
        let purged = self.purge_expired();
        if purged > 0 {
            log::trace!("Purged {purged} expired cache entries");
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                tags: tags.to_vec(),
            },
        );
    }

    fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn invalidate_by_tag(&self, tag: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.tags.iter().any(|t| t == tag));
        before - self.entries.len()
    }
}

/// How a response was served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub key: String,
    pub cacheable: bool,
    pub hit: bool,
    pub ttl_seconds: u64,
    pub cache_control: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cached<T> {
    pub value: T,
    pub cache: CacheInfo,
}

/// Return the stored value for `key`, or run `compute` and store its result
/// when the decision allows caching.
///
/// Concurrent misses on one key both compute and both write; the last write wins.
pub async fn memoize<T, F, Fut>(
    store: &dyn CacheStore,
    key: String,
    decision: CachePolicyDecision,
    tags: &[String],
    compute: F,
) -> Result<Cached<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cache_control = if decision.cacheable {
        cache_control_header(decision.ttl_seconds)
    } else {
        "no-store".to_string()
    };
    let info = |hit| CacheInfo {
        key: key.clone(),
        cacheable: decision.cacheable,
        hit,
        ttl_seconds: decision.ttl_seconds,
        cache_control: cache_control.clone(),
    };

    if decision.cacheable {
        if let Some(stored) = store.get(&key) {
            match serde_json::from_value::<T>(stored) {
                Ok(value) => {
                    log::debug!("Cache hit: {key}");
                    return Ok(Cached {
                        value,
                        cache: info(true),
                    });
                }
                Err(e) => {
                    log::warn!("Discarding unreadable cache entry {key}: {e}");
                    store.invalidate(&key);
                }
            }
        }
    }

    let value = compute().await?;
    if decision.cacheable {
        store.set(
            &key,
            serde_json::to_value(&value)?,
            Duration::from_secs(decision.ttl_seconds),
            tags,
        );
        log::debug!("Cache set: {key} (ttl {}s)", decision.ttl_seconds);
    }
    Ok(Cached {
        value,
        cache: info(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::Error;

    #[test]
    fn test_should_cache() {
        assert!(!should_cache(&RangeKeyword::Today, false));
        assert!(should_cache(&RangeKeyword::LastQuarter, false));
        assert!(should_cache(&RangeKeyword::Yesterday, false));
        for kw in RangeKeyword::all() {
            assert!(!should_cache(&kw, true), "{kw} with custom dates");
        }
        assert!(!should_cache(&RangeKeyword::Unknown("x".into()), true));
    }

    #[test]
    fn test_ttl_grows_with_age() {
        assert_eq!(ttl_seconds(&RangeKeyword::Today, false), 600);
        assert_eq!(ttl_seconds(&RangeKeyword::ThisWeek, false), 900);
        assert_eq!(ttl_seconds(&RangeKeyword::ThisMonth, false), 1800);
        assert_eq!(ttl_seconds(&RangeKeyword::LastQuarter, false), 3600);
        assert_eq!(ttl_seconds(&RangeKeyword::Quarter(2), false), 3600);
        assert_eq!(ttl_seconds(&RangeKeyword::ThisYear, false), 7200);
        assert_eq!(ttl_seconds(&RangeKeyword::LastQuarter, true), 900);
        assert_eq!(ttl_seconds(&RangeKeyword::Unknown("soon".into()), false), 900);
        for kw in [RangeKeyword::LastMonth, RangeKeyword::LastQuarter, RangeKeyword::LastYear] {
            assert!(ttl_seconds(&kw, false) >= 3600);
        }
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = cache_key("kpi", [("range", "thisMonth"), ("regionCode", "R1"), ("userCode", "A")]);
        let b = cache_key("kpi", [("userCode", "A"), ("range", "thisMonth"), ("regionCode", "R1")]);
        assert_eq!(a, b);
        assert!(a.starts_with("kpi:"));
        assert_eq!(a.len(), "kpi:".len() + 64);
    }

    #[test]
    fn test_cache_key_differs_on_any_value() {
        let base = cache_key("kpi", [("range", "thisMonth"), ("regionCode", "R1")]);
        assert_ne!(base, cache_key("kpi", [("range", "thisMonth"), ("regionCode", "R2")]));
        assert_ne!(base, cache_key("kpi", [("range", "lastMonth"), ("regionCode", "R1")]));
        assert_ne!(base, cache_key("trend", [("range", "thisMonth"), ("regionCode", "R1")]));
    }

    #[test]
    fn test_cache_key_ignores_empty_values() {
        let a = cache_key("kpi", [("range", "thisMonth"), ("storeCode", "")]);
        let b = cache_key("kpi", [("range", "thisMonth")]);
        assert_eq!(a, b);

        let map: BTreeMap<String, String> = [("range".to_string(), "thisMonth".to_string())].into();
        assert_eq!(cache_key("kpi", &map), b);
    }

    #[test]
    fn test_cache_control_header() {
        assert_eq!(
            cache_control_header(600),
            "public, s-maxage=600, stale-while-revalidate=1200"
        );
    }

    #[test]
    fn test_memory_cache_expiry_and_tags() {
        let cache = MemoryCache::new();
        let tags = vec!["kpi".to_string()];
        cache.set("k1", serde_json::json!(1), Duration::from_secs(60), &tags);
        cache.set("k2", serde_json::json!(2), Duration::from_secs(60), &["trend".to_string()]);
        cache.set("k3", serde_json::json!(3), Duration::ZERO, &tags);

        assert_eq!(cache.get("k1"), Some(serde_json::json!(1)));
        assert_eq!(cache.get("k3"), None);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.invalidate_by_tag("kpi"), 1);
        assert_eq!(cache.get("k1"), None);
        assert!(cache.invalidate("k2"));
        assert!(!cache.invalidate("k2"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_sweeps_expired_entries_never_read_again() {
        let cache = MemoryCache::new();
        cache.set("stale-a", serde_json::json!(1), Duration::ZERO, &[]);
        cache.set("stale-b", serde_json::json!(2), Duration::from_millis(1), &[]);
        cache.set("live", serde_json::json!(3), Duration::from_secs(60), &[]);
        std::thread::sleep(Duration::from_millis(5));

        cache.set("fresh", serde_json::json!(4), Duration::from_secs(60), &[]);

        assert_eq!(cache.entries.len(), 2);
        assert!(!cache.entries.contains_key("stale-a"));
        assert!(!cache.entries.contains_key("stale-b"));
        assert_eq!(cache.get("live"), Some(serde_json::json!(3)));
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_memoize_hit_skips_compute() {
        let cache = MemoryCache::new();
        let calls = AtomicUsize::new(0);
        let decision = decide(&RangeKeyword::LastMonth, false);

        for expect_hit in [false, true] {
            let got = memoize(&cache, "kpi:abc".to_string(), decision, &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(vec![1.5, 2.5])
            })
            .await
            .unwrap();
            assert_eq!(got.value, vec![1.5, 2.5]);
            assert_eq!(got.cache.hit, expect_hit);
            assert_eq!(got.cache.ttl_seconds, 3600);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memoize_uncacheable_always_computes() {
        let cache = MemoryCache::new();
        let calls = AtomicUsize::new(0);
        let decision = decide(&RangeKeyword::Today, false);

        for _ in 0..2 {
            let got = memoize(&cache, "kpi:today".to_string(), decision, &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(7u32)
            })
            .await
            .unwrap();
            assert!(!got.cache.hit);
            assert_eq!(got.cache.cache_control, "no-store");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memoize_does_not_store_errors() {
        let cache = MemoryCache::new();
        let decision = decide(&RangeKeyword::LastYear, false);
        let result: Result<Cached<u32>> =
            memoize(&cache, "kpi:err".to_string(), decision, &[], || async {
                Err(Error::Database("connection reset".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get("kpi:err").is_none());
    }
}

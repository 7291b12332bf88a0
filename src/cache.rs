//! A thread-safe in-memory store of resolved flag values, keyed by request fingerprint.
//!
//! [`ResolutionCache`] is consulted by the evaluation client before every remote call and is
//! mutated by the connection manager when the server pushes change notifications. Entries are
//! immutable once stored and are only ever replaced wholesale.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::fingerprint::belongs_to_flag;
use crate::Value;

/// Configuration for [`ResolutionCache`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Per-entry time-to-live. [`Duration::ZERO`] disables expiry.
    pub ttl: Duration,
    /// Aggregate size budget in bytes. `0` disables size-based eviction.
    pub max_bytes: usize,
}

impl CacheConfig {
    /// Create a config with expiry and size eviction disabled.
    pub fn new() -> CacheConfig {
        CacheConfig::default()
    }

    /// Set the per-entry time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> CacheConfig {
        self.ttl = ttl;
        self
    }

    /// Set the aggregate size budget in bytes.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> CacheConfig {
        self.max_bytes = max_bytes;
        self
    }
}

/// A successfully resolved flag value together with the server's reason and variant.
///
/// Entries are immutable; re-resolution replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The resolved value.
    pub value: Value,
    /// Name of the variant the server picked, if any.
    pub variant: Option<String>,
    /// Server-supplied reason for the resolution.
    pub reason: Option<String>,
}

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Option<Instant>,
    /// Estimated size in bytes, fixed at insertion time.
    size: usize,
}

/// `ResolutionCache` provides a thread-safe store of fingerprint → [`CacheEntry`].
///
/// All four operations take the same mutex, so concurrent `get`/`set`/`invalidate_by_flag`/
/// `flush_all` are totally ordered and a partially-updated entry is never visible.
///
/// When the aggregate size estimate exceeds [`CacheConfig::max_bytes`] after an insertion, the
/// entire cache is flushed rather than evicting individual entries. This is a deliberately blunt
/// policy: the cache is repopulated on demand, and whole-cache flushes keep the bookkeeping to a
/// single counter per entry.
pub struct ResolutionCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl ResolutionCache {
    /// Create a new empty cache.
    pub fn new(config: CacheConfig) -> ResolutionCache {
        ResolutionCache {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the live entry for `key`. Returns `None` if the entry is missing or expired.
    ///
    /// An expired entry is dropped on access; there is no background sweeper.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.lock();

        let expired = matches!(
            entries.get(key),
            Some(StoredEntry { expires_at: Some(deadline), .. }) if *deadline <= Instant::now()
        );
        if expired {
            entries.remove(key);
            return None;
        }

        entries.get(key).map(|stored| stored.entry.clone())
    }

    /// Insert or overwrite the entry for `key`.
    ///
    /// If the insertion pushes the aggregate size estimate over the configured budget, the whole
    /// cache (including the new entry) is flushed.
    pub fn set(&self, key: String, entry: CacheEntry) {
        let expires_at = (self.config.ttl > Duration::ZERO).then(|| Instant::now() + self.config.ttl);
        let size = estimate_size(&key, &entry);

        let mut entries = self.lock();
        entries.insert(
            key,
            StoredEntry {
                entry,
                expires_at,
                size,
            },
        );

        if self.config.max_bytes > 0 {
            let total: usize = entries.values().map(|stored| stored.size).sum();
            if total > self.config.max_bytes {
                log::debug!(target: "flagd",
                            total, max_bytes = self.config.max_bytes;
                            "cache size estimate over budget, flushing");
                entries.clear();
            }
        }
    }

    /// Remove every entry belonging to `flag_key`. Returns the number of entries removed.
    pub fn invalidate_by_flag(&self, flag_key: &str) -> usize {
        let mut entries = self.lock();

        let before = entries.len();
        entries.retain(|key, _| !belongs_to_flag(key, flag_key));
        before - entries.len()
    }

    /// Remove every entry unconditionally.
    pub fn flush_all(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredEntry>> {
        // Err() is possible only if the lock is poisoned (a thread panicked while holding it),
        // which should never happen.
        self.entries
            .lock()
            .expect("thread holding cache lock should not panic")
    }
}

/// Estimate an entry's contribution to the cache's size: key bytes plus serialized value bytes
/// plus variant/reason bytes.
fn estimate_size(key: &str, entry: &CacheEntry) -> usize {
    let value_bytes = serde_json::to_string(&entry.value)
        .map(|json| json.len())
        .unwrap_or(0);
    let variant_bytes = entry.variant.as_deref().map_or(0, str::len);
    let reason_bytes = entry.reason.as_deref().map_or(0, str::len);

    key.len() + value_bytes + variant_bytes + reason_bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: Value) -> CacheEntry {
        CacheEntry {
            value,
            variant: Some("on".to_owned()),
            reason: Some("STATIC".to_owned()),
        }
    }

    #[test]
    fn get_returns_stored_entry() {
        let cache = ResolutionCache::new(CacheConfig::new());

        cache.set("flag|abc".to_owned(), entry(Value::Boolean(true)));

        assert_eq!(cache.get("flag|abc"), Some(entry(Value::Boolean(true))));
        assert_eq!(cache.get("flag|def"), None);
    }

    #[test]
    fn set_replaces_wholesale() {
        let cache = ResolutionCache::new(CacheConfig::new());

        cache.set("flag|abc".to_owned(), entry(Value::Boolean(true)));
        cache.set("flag|abc".to_owned(), entry(Value::Boolean(false)));

        assert_eq!(cache.get("flag|abc"), Some(entry(Value::Boolean(false))));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache =
            ResolutionCache::new(CacheConfig::new().with_ttl(Duration::from_millis(20)));

        cache.set("flag|abc".to_owned(), entry(Value::Boolean(true)));
        assert!(cache.get("flag|abc").is_some());

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("flag|abc"), None);
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let cache = ResolutionCache::new(CacheConfig::new());

        cache.set("flag|abc".to_owned(), entry(Value::Boolean(true)));
        std::thread::sleep(Duration::from_millis(10));

        assert!(cache.get("flag|abc").is_some());
    }

    #[test]
    fn crossing_size_budget_flushes_everything() {
        let cache = ResolutionCache::new(CacheConfig::new().with_max_bytes(64));

        cache.set("a|1".to_owned(), entry(Value::from("small")));
        assert!(cache.get("a|1").is_some());

        // Push the aggregate estimate past 64 bytes; the whole cache empties, not just the
        // newest entry.
        cache.set(
            "b|2".to_owned(),
            entry(Value::from("a string comfortably longer than the remaining budget")),
        );

        assert_eq!(cache.get("a|1"), None);
        assert_eq!(cache.get("b|2"), None);
    }

    #[test]
    fn zero_max_bytes_disables_size_eviction() {
        let cache = ResolutionCache::new(CacheConfig::new());

        for i in 0..100 {
            cache.set(
                format!("flag-{i}|hash"),
                entry(Value::from("some reasonably long flag value payload")),
            );
        }

        assert!(cache.get("flag-0|hash").is_some());
        assert!(cache.get("flag-99|hash").is_some());
    }

    #[test]
    fn invalidate_by_flag_is_targeted() {
        let cache = ResolutionCache::new(CacheConfig::new());

        cache.set("flag-a|1".to_owned(), entry(Value::Boolean(true)));
        cache.set("flag-a|2".to_owned(), entry(Value::Boolean(false)));
        cache.set("flag-b|1".to_owned(), entry(Value::from("other")));

        assert_eq!(cache.invalidate_by_flag("flag-a"), 2);

        assert_eq!(cache.get("flag-a|1"), None);
        assert_eq!(cache.get("flag-a|2"), None);
        assert!(cache.get("flag-b|1").is_some());
    }

    #[test]
    fn invalidate_does_not_match_prefix_flags() {
        let cache = ResolutionCache::new(CacheConfig::new());

        cache.set("flag|1".to_owned(), entry(Value::Boolean(true)));
        cache.set("flag-v2|1".to_owned(), entry(Value::Boolean(true)));

        assert_eq!(cache.invalidate_by_flag("flag"), 1);
        assert!(cache.get("flag-v2|1").is_some());
    }

    #[test]
    fn flush_all_empties_the_cache() {
        let cache = ResolutionCache::new(CacheConfig::new());

        cache.set("flag-a|1".to_owned(), entry(Value::Boolean(true)));
        cache.set("flag-b|1".to_owned(), entry(Value::Boolean(true)));

        cache.flush_all();

        assert_eq!(cache.get("flag-a|1"), None);
        assert_eq!(cache.get("flag-b|1"), None);
    }

    #[test]
    fn can_be_used_from_another_thread() {
        use std::sync::Arc;

        let cache = Arc::new(ResolutionCache::new(CacheConfig::new()));

        {
            let cache = cache.clone();
            let _ = std::thread::spawn(move || {
                cache.set("flag|abc".to_owned(), entry(Value::Boolean(true)));
            })
            .join();
        }

        assert!(cache.get("flag|abc").is_some());
    }
}

//! crates/proscientia_core/src/cache.rs
//!
//! A small read-through cache with a fixed TTL and an injectable clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of "now" for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

struct Entry<V> {
    stored_at: Instant,
    value: V,
}

/// Entries live for exactly `ttl` after insertion. There is no size bound:
/// keys are drawn from a small set of catalog paths.
pub struct TtlCache<V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a fresh entry, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < self.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let stored_at = self.clock.now();
        self.entries().insert(key.into(), Entry { stored_at, value });
    }

    pub fn invalidate(&self, key: &str) {
        self.entries().remove(key);
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64) -> (Arc<ManualClock>, TtlCache<String>) {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::new(Duration::from_secs(ttl_secs), clock.clone());
        (clock, cache)
    }

    #[test]
    fn entry_is_served_until_ttl_elapses() {
        let (clock, cache) = cache(300);
        cache.insert("mes:listing:latest", "v1".to_string());

        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get("mes:listing:latest").as_deref(), Some("v1"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("mes:listing:latest"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinsert_restarts_the_clock() {
        let (clock, cache) = cache(10);
        cache.insert("k", "a".to_string());
        clock.advance(Duration::from_secs(8));
        cache.insert("k", "b".to_string());
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("k").as_deref(), Some("b"));
    }

    #[test]
    fn invalidate_only_touches_one_key() {
        let (_clock, cache) = cache(60);
        cache.insert("erp:listing:latest", "latest".to_string());
        cache.insert("erp:listing:2025-12-15", "dated".to_string());
        cache.invalidate("erp:listing:latest");
        assert_eq!(cache.get("erp:listing:latest"), None);
        assert_eq!(cache.get("erp:listing:2025-12-15").as_deref(), Some("dated"));
    }
}

//! Bounded, time-limited cache for idempotent method results.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Cache of previously observed method results, keyed by method name and a
/// caller-chosen key.
///
/// Each method gets its own bounds: entries are evicted least-recently-used
/// once the count bound is reached, and expire once older than the maximum
/// age. Expiry is checked lazily on lookup. Methods without bounds are never
/// cached.
#[derive(Default)]
pub(crate) struct MethodCache {
    methods: Mutex<HashMap<String, MethodEntries>>,
}

struct MethodEntries {
    max_entries: usize,
    max_age: Duration,
    entries: HashMap<String, CacheEntry>,
    /// Recency order; front is the least recently used key.
    order: VecDeque<String>,
}

struct CacheEntry {
    value: Value,
    inserted: Instant,
}

impl MethodCache {
    /// Establish bounds for `method`, discarding any existing entries.
    pub(crate) fn create(&self, method: &str, max_entries: usize, max_age: Duration) {
        self.methods.lock().insert(
            method.to_string(),
            MethodEntries {
                max_entries,
                max_age,
                entries: HashMap::new(),
                order: VecDeque::new(),
            },
        );
    }

    /// Cached value for `(method, key)`, if present and not aged out.
    pub(crate) fn get(&self, method: &str, key: &str) -> Option<Value> {
        let mut methods = self.methods.lock();
        let state = methods.get_mut(method)?;
        let expired = match state.entries.get(key) {
            Some(entry) => entry.inserted.elapsed() > state.max_age,
            None => return None,
        };
        if expired {
            state.entries.remove(key);
            state.order.retain(|k| k != key);
            debug!(method, key, "cache entry aged out");
            return None;
        }
        state.touch(key);
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a result for `(method, key)`; a no-op for unbounded methods.
    pub(crate) fn insert(&self, method: &str, key: &str, value: Value) {
        let mut methods = self.methods.lock();
        let Some(state) = methods.get_mut(method) else {
            return;
        };
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted: Instant::now(),
            },
        );
        state.touch(key);
        while state.entries.len() > state.max_entries {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            debug!(method, key = %oldest, "evicted least recently used cache entry");
        }
    }

    /// Drop one entry, or every entry for `method` when `key` is `None`.
    pub(crate) fn invalidate(&self, method: &str, key: Option<&str>) {
        let mut methods = self.methods.lock();
        let Some(state) = methods.get_mut(method) else {
            return;
        };
        match key {
            Some(key) => {
                state.entries.remove(key);
                state.order.retain(|k| k != key);
            }
            None => {
                state.entries.clear();
                state.order.clear();
            }
        }
    }
}

impl MethodEntries {
    /// Mark `key` as most recently used.
    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }
}

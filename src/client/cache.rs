use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

/// Results younger than this are served from the cache.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Procedure path plus its serialized input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub path: String,
    pub input: Option<String>,
}

impl QueryKey {
    pub fn new(path: &str, input: Option<&Value>) -> Self {
        QueryKey { path: path.to_string(), input: input.map(|v| v.to_string()) }
    }
}

struct Entry {
    value: Value,
    fetched_at: Instant,
}

/// Query results keyed by `QueryKey`. Failed fetches are never stored.
pub struct QueryCache {
    stale_time: Duration,
    entries: RwLock<HashMap<QueryKey, Entry>>,
}

impl Default for QueryCache {
    fn default() -> Self { Self::new(DEFAULT_STALE_TIME) }
}

impl QueryCache {
    pub fn new(stale_time: Duration) -> Self {
        QueryCache { stale_time, entries: RwLock::new(HashMap::new()) }
    }

    pub fn stale_time(&self) -> Duration { self.stale_time }

    pub fn get_fresh(&self, key: &QueryKey) -> Option<Value> {
        let map = self.entries.read();
        let e = map.get(key)?;
        if e.fetched_at.elapsed() < self.stale_time { Some(e.value.clone()) } else { None }
    }

    pub fn put(&self, key: QueryKey, value: Value) {
        self.entries.write().insert(key, Entry { value, fetched_at: Instant::now() });
    }

    /// Idempotent.
    pub fn invalidate(&self, key: &QueryKey) -> bool { self.entries.write().remove(key).is_some() }

    /// Drop every entry for `path`, whatever its input.
    pub fn invalidate_path(&self, path: &str) -> usize {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|k, _| k.path != path);
        before - map.len()
    }

    /// Drop everything; used when the session changes hands.
    pub fn clear(&self) { self.entries.write().clear(); }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}

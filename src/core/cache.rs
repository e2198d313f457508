use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Bounded TTL cache for generated payloads, keyed by a hash of the prompt.
/// Owned by the caller and passed into the gateway explicitly; there is no
/// process-global cache.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<u64, (Instant, Value)>>,
    ttl: Duration,
    capacity: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    pub fn get(&self, prompt: &str) -> Option<Value> {
        let key = hash_key(prompt);
        let mut entries = self.entries.lock().ok()?;
        match entries.get(&key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, prompt: &str, value: Value) {
        let key = hash_key(prompt);
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // Evict the oldest entry to stay within the bound.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (inserted, _))| *inserted)
                .map(|(k, _)| *k)
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 256)
    }
}

fn hash_key(prompt: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    hasher.finish()
}

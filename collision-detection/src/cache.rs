use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
}

/// TTL + max-size cache for detection results, keyed by a composite string.
/// Reads happen concurrently during fan-out; writes follow single-writer-
/// per-key discipline (each engine only writes its own keys), so a plain
/// mutex-wrapped map suffices.
pub struct ResultCache<T> {
    ttl: Duration,
    max_size: usize,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size: max_size.max(1),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Composite key: engine, source, sorted target ids. Sorting makes the
    /// key independent of target ordering.
    pub fn key(engine: &str, source_id: &str, target_ids: &[&str]) -> String {
        let mut sorted: Vec<&str> = target_ids.to_vec();
        sorted.sort_unstable();
        format!("{engine}:{source_id}:{}", sorted.join(","))
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => {
                warn!("result cache mutex poisoned; recovering");
                poisoned.into_inner()
            }
        };

        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: String, value: T) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

//! Bounded result caches with bulk eviction by insertion order.
//!
//! The eviction policy is deliberately *not* LRU: once the cache reaches
//! capacity, a configured fraction of the oldest entries (by insertion
//! order) is dropped in one sweep before the new entry goes in. Callers
//! must not assume recency-based retention. The policy lives behind the
//! [`Cache`] trait so it can be swapped without touching call sites.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Minimal cache interface used by the matcher and the detection engine.
pub trait Cache<V: Clone>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn put(&self, key: String, value: V);
    /// Drop every entry whose key starts with `prefix` (used when rules for
    /// a (category, point) change).
    fn invalidate_prefix(&self, prefix: &str);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Inner<V> {
    map: HashMap<String, V>,
    order: VecDeque<String>,
}

/// Capacity-bounded cache evicting the oldest `evict_fraction` of entries
/// in bulk when full. All read-modify-evict-write sequences run under one
/// internal mutex.
#[derive(Debug)]
pub struct BulkEvictCache<V> {
    capacity: usize,
    evict_fraction: f32,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> BulkEvictCache<V> {
    pub fn new(capacity: usize, evict_fraction: f32) -> Self {
        Self {
            capacity: capacity.max(1),
            evict_fraction: evict_fraction.clamp(0.01, 1.0),
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut g = self.inner.lock().expect("cache mutex poisoned");
        g.map.clear();
        g.order.clear();
    }
}

impl<V: Clone + Send + Sync> Cache<V> for BulkEvictCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let g = self.inner.lock().expect("cache mutex poisoned");
        g.map.get(key).cloned()
    }

    fn put(&self, key: String, value: V) {
        let mut g = self.inner.lock().expect("cache mutex poisoned");
        if g.map.contains_key(&key) {
            g.map.insert(key, value);
            return;
        }
        if g.map.len() >= self.capacity {
            let batch = ((self.capacity as f32 * self.evict_fraction) as usize).max(1);
            for _ in 0..batch {
                match g.order.pop_front() {
                    Some(old) => {
                        g.map.remove(&old);
                    }
                    None => break,
                }
            }
        }
        g.order.push_back(key.clone());
        g.map.insert(key, value);
    }

    fn invalidate_prefix(&self, prefix: &str) {
        let mut g = self.inner.lock().expect("cache mutex poisoned");
        g.map.retain(|k, _| !k.starts_with(prefix));
        let map = &g.map;
        let retained: VecDeque<String> = g
            .order
            .iter()
            .filter(|k| map.contains_key(*k))
            .cloned()
            .collect();
        g.order = retained;
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").map.len()
    }
}

/// Short content hash used inside cache keys (never log raw transcript
/// text; the hash is also what diagnostics print).
pub fn text_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Cache key for a (category, point, text) triple. Unrelated detection
/// points never collide: category and point are spelled out, the text is
/// identified by its digest.
pub fn result_key(category: &str, point: &str, text: &str) -> String {
    format!("{category}:{point}:{}", text_digest(text))
}

/// Fusion-level keys also carry a disambiguating context hint (the config
/// fingerprint) so results fused under different thresholds stay apart.
pub fn result_key_with_hint(category: &str, point: &str, text: &str, hint: &str) -> String {
    format!("{category}:{point}:{}:{hint}", text_digest(text))
}

/// Prefix matching every cached key for a (category, point), with or
/// without a hint suffix.
pub fn point_prefix(category: &str, point: &str) -> String {
    format!("{category}:{point}:")
}

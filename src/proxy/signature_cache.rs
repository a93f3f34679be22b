use std::collections::HashMap;
use std::sync::Mutex;

use crate::constants::{FAMILY_CACHE_CAPACITY, MIN_SIGNATURE_LENGTH, TOOL_SIGNATURE_CACHE_CAPACITY};

struct LruEntry {
    value: String,
    last_access: u64,
}

/// Fixed-capacity string map with least-recently-used eviction. Access order
/// is tracked with a monotonic counter; eviction scans for the minimum, which
/// is fine at these capacities.
struct LruMap {
    entries: HashMap<String, LruEntry>,
    capacity: usize,
    clock: u64,
}

impl LruMap {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            clock: 0,
        }
    }

    fn insert(&mut self, key: String, value: String) {
        self.clock += 1;
        let clock = self.clock;
        self.entries.insert(key, LruEntry { value, last_access: clock });

        if self.entries.len() > self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = clock;
            entry.value.clone()
        })
    }
}

/// Process-local store for opaque thought signatures.
///
/// Two access patterns: recovering a signature the client stripped from a
/// follow-up `tool_use` (keyed by tool-use id), and refusing cross-family
/// signature injection into Gemini targets (keyed by the signature itself).
pub struct SignatureCache {
    tool_signatures: Mutex<LruMap>,
    signature_families: Mutex<LruMap>,
    min_signature_length: usize,
}

impl SignatureCache {
    pub fn new(tool_capacity: usize, family_capacity: usize, min_signature_length: usize) -> Self {
        Self {
            tool_signatures: Mutex::new(LruMap::new(tool_capacity)),
            signature_families: Mutex::new(LruMap::new(family_capacity)),
            min_signature_length,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            TOOL_SIGNATURE_CACHE_CAPACITY,
            FAMILY_CACHE_CAPACITY,
            MIN_SIGNATURE_LENGTH,
        )
    }

    pub fn cache_tool_signature(&self, tool_use_id: &str, signature: &str) {
        if signature.len() < self.min_signature_length {
            return;
        }
        if let Ok(mut cache) = self.tool_signatures.lock() {
            tracing::debug!(
                "[SignatureCache] Caching tool signature for id: {}",
                tool_use_id
            );
            cache.insert(tool_use_id.to_string(), signature.to_string());
        }
    }

    pub fn get_tool_signature(&self, tool_use_id: &str) -> Option<String> {
        if let Ok(mut cache) = self.tool_signatures.lock() {
            if let Some(sig) = cache.get(tool_use_id) {
                tracing::debug!(
                    "[SignatureCache] Hit tool signature for id: {}",
                    tool_use_id
                );
                return Some(sig);
            }
        }
        None
    }

    /// Records which model family ("claude" or "gemini") issued a signature.
    pub fn cache_signature_family(&self, signature: &str, family: &str) {
        if signature.len() < self.min_signature_length {
            return;
        }
        if let Ok(mut cache) = self.signature_families.lock() {
            cache.insert(signature.to_string(), family.to_string());
        }
    }

    pub fn family_of(&self, signature: &str) -> Option<String> {
        if let Ok(mut cache) = self.signature_families.lock() {
            return cache.get(signature);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> SignatureCache {
        SignatureCache::new(3, 3, 50)
    }

    #[test]
    fn insert_then_lookup_returns_signature() {
        let cache = small_cache();
        let sig = "x".repeat(60);
        cache.cache_tool_signature("toolu_1", &sig);
        assert_eq!(cache.get_tool_signature("toolu_1"), Some(sig));
    }

    #[test]
    fn never_inserted_id_returns_none() {
        let cache = small_cache();
        assert_eq!(cache.get_tool_signature("toolu_missing"), None);
    }

    #[test]
    fn short_signatures_are_rejected() {
        let cache = small_cache();
        cache.cache_tool_signature("toolu_short", "too-short");
        assert_eq!(cache.get_tool_signature("toolu_short"), None);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = small_cache();
        let sig = |c: char| c.to_string().repeat(60);

        cache.cache_tool_signature("a", &sig('a'));
        cache.cache_tool_signature("b", &sig('b'));
        cache.cache_tool_signature("c", &sig('c'));

        // Touch "a" so "b" becomes the oldest, then overflow.
        assert!(cache.get_tool_signature("a").is_some());
        cache.cache_tool_signature("d", &sig('d'));

        assert!(cache.get_tool_signature("a").is_some());
        assert!(cache.get_tool_signature("b").is_none());
        assert!(cache.get_tool_signature("c").is_some());
        assert!(cache.get_tool_signature("d").is_some());
    }

    #[test]
    fn family_map_tracks_origin() {
        let cache = small_cache();
        let sig = "y".repeat(80);
        cache.cache_signature_family(&sig, "claude");
        assert_eq!(cache.family_of(&sig).as_deref(), Some("claude"));
        assert_eq!(cache.family_of("unseen"), None);
    }
}

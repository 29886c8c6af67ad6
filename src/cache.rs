//! Cache (C6, spec.md §4.6): content-addressed by `(query, modelIds,
//! synthesizerModelId, pipelineVersion)`, backed by an in-memory map with a
//! per-entry TTL. Grounded on the gateway's tiered `DashMap` cache idiom,
//! collapsed to a single tier since there is no shared store in this crate's
//! dependency stack.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::types::OrchestrationResult;

/// Bumped whenever stage semantics change in a way that would make an old
/// cached result misleading (spec.md §4.6).
pub const PIPELINE_VERSION: &str = "1";

/// Canonicalize `query` for cache-key purposes: normalize CRLF/CR to LF and
/// trim trailing whitespace on each line. Never truncates (spec.md §4.6
/// explicitly calls out key truncation as an anti-pattern).
pub fn canonicalize_query(query: &str) -> String {
    query
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `sha256(canonicalize(query) || sorted(modelIds) || synthesizerModelId || pipelineVersion)`
/// (spec.md §4.6). `model_ids` is sorted internally so caller order never
/// affects the key.
pub fn cache_key(query: &str, model_ids: &[String], synthesizer_model_id: &str) -> String {
    let mut sorted_ids = model_ids.to_vec();
    sorted_ids.sort();

    let mut hasher = Sha256::new();
    hasher.update(canonicalize_query(query).as_bytes());
    hasher.update(b"\0");
    hasher.update(sorted_ids.join("\0").as_bytes());
    hasher.update(b"\0");
    hasher.update(synthesizer_model_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(PIPELINE_VERSION.as_bytes());

    hex::encode(hasher.finalize())
}

struct Entry {
    result: OrchestrationResult,
    inserted_at: Instant,
}

/// Content-addressed result cache. Cheap to clone and share via `Arc`.
pub struct OrchestrationCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl OrchestrationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<OrchestrationResult> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.result.clone())
    }

    pub fn put(&self, key: String, result: OrchestrationResult) {
        self.entries.insert(
            key,
            Entry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStatus;
    use uuid::Uuid;

    fn result() -> OrchestrationResult {
        OrchestrationResult {
            request_id: Uuid::new_v4(),
            status: RunStatus::Done,
            stages: vec![],
            final_answer: Some("answer".to_string()),
            synthesis_fallback: false,
            total_latency_ms: 10,
            estimated_cost_usd: 0.01,
        }
    }

    #[test]
    fn test_canonicalize_normalizes_line_endings_and_trailing_whitespace() {
        let a = canonicalize_query("hello \r\nworld  \r\n");
        let b = canonicalize_query("hello\nworld\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_insensitive_to_model_id_order() {
        let k1 = cache_key("q", &["a".into(), "b".into()], "synth");
        let k2 = cache_key("q", &["b".into(), "a".into()], "synth");
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_cache_key_changes_with_synthesizer() {
        let k1 = cache_key("q", &["a".into()], "synth1");
        let k2 = cache_key("q", &["a".into()], "synth2");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_cache_key_not_truncated_for_long_queries() {
        let long_query = "a".repeat(100_000);
        let k1 = cache_key(&long_query, &["a".into()], "synth");
        let mut different = long_query.clone();
        different.push('b');
        let k2 = cache_key(&different, &["a".into()], "synth");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_get_put_roundtrip() {
        let cache = OrchestrationCache::new(Duration::from_secs(60));
        let key = cache_key("q", &["a".into()], "synth");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), result());
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = OrchestrationCache::new(Duration::from_millis(1));
        let key = cache_key("q", &["a".into()], "synth");
        cache.put(key.clone(), result());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&key).is_none());
    }
}

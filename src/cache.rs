//! Content-addressed result cache: deterministic fingerprints over a
//! bounded least-recently-used store.
//!
//! The fingerprint binds a result to everything that could change it: the
//! raw input bytes, the three operation flags, and the normalized option
//! record. Option serialization is canonical — object keys sorted
//! recursively — so two logically identical requests fingerprint identically
//! regardless of how their option data was assembled.
//!
//! The store is pipeline-local, not shared across batch workers: its purpose
//! is reuse across a session of calls on one pipeline, not cross-worker
//! deduplication.

use crate::config::ProcessingRequest;
use crate::document::ProcessingResult;
use indexmap::IndexMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Compute the cache fingerprint for a request.
///
/// Pure: same bytes + same normalized request ⇒ same hex digest. The caller
/// passes an already-normalized request so normalization differences can
/// never split the keyspace.
pub fn fingerprint(bytes: &[u8], request: &ProcessingRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);

    // serde_json::to_value cannot fail for a plain data struct.
    let record = serde_json::to_value(request).unwrap_or(Value::Null);
    hasher.update(canonical_json(&record).as_bytes());

    hex::encode(hasher.finalize())
}

/// Render a JSON value with all object keys sorted, recursively.
///
/// Arrays keep their element order: list ordering is semantic (term lists
/// preserve caller order), map key ordering is not.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Bounded LRU map from fingerprint to finalized result.
#[derive(Debug)]
pub struct CacheStore {
    entries: IndexMap<String, ProcessingResult>,
    capacity: usize,
}

impl CacheStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a fingerprint, marking the entry most-recently-used.
    ///
    /// Returns a clone with `cache_hit` forced true; every other metadata
    /// field — including timing, which is historical — is preserved verbatim
    /// from the original computation.
    pub fn get(&mut self, key: &str) -> Option<ProcessingResult> {
        if self.capacity == 0 {
            return None;
        }
        let entry = self.entries.shift_remove(key)?;
        let mut result = entry.clone();
        // Re-insert at the back: back of the map is most-recently-used.
        self.entries.insert(key.to_string(), entry);
        result.metadata.cache_hit = true;
        debug!(key = %&key[..12.min(key.len())], "cache hit");
        Some(result)
    }

    /// Store a result under a fingerprint. No-op when caching is disabled.
    ///
    /// Stores its own clone so later mutation of the returned result can
    /// never corrupt the cached copy. Evicts strictly least-recently-used,
    /// one entry at a time, until size ≤ capacity.
    pub fn put(&mut self, key: String, result: &ProcessingResult) {
        if self.capacity == 0 {
            return;
        }
        self.entries.shift_remove(&key);
        self.entries.insert(key, result.clone());
        while self.entries.len() > self.capacity {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                debug!(key = %&evicted[..12.min(evicted.len())], "cache evict");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Options, ProcessingRequest};
    use crate::document::{Metadata, NerMode, OcrSummary, OutputContent, ProcessingResult};
    use std::collections::BTreeMap;

    fn request(terms: Vec<&str>) -> ProcessingRequest {
        ProcessingRequest {
            anonymize: true,
            remove_pii: false,
            extract_json: false,
            options: Options {
                anonymize_terms: terms.into_iter().map(String::from).collect(),
                ..Options::default()
            },
        }
        .normalized()
    }

    fn result(tag: &str) -> ProcessingResult {
        ProcessingResult {
            content: OutputContent::Text(tag.to_string()),
            extension: ".json".to_string(),
            metadata: Metadata {
                timing: BTreeMap::from([("read_txt".to_string(), 0.01)]),
                throughput_mode: false,
                cache_hit: false,
                ner_mode: NerMode::RegexOnly,
                ocr: OcrSummary {
                    engine: "unavailable".to_string(),
                    images_processed: 0,
                    images_skipped: 0,
                    max_images_per_doc: 10,
                    enabled: false,
                },
                pdf_engine: None,
                options: Options::default(),
            },
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let r = request(vec!["Acme"]);
        assert_eq!(fingerprint(b"hello", &r), fingerprint(b"hello", &r));
    }

    #[test]
    fn fingerprint_varies_with_bytes_and_flags() {
        let r = request(vec!["Acme"]);
        assert_ne!(fingerprint(b"hello", &r), fingerprint(b"world", &r));

        let mut r2 = r.clone();
        r2.remove_pii = true;
        assert_ne!(fingerprint(b"hello", &r), fingerprint(b"hello", &r2));
    }

    #[test]
    fn fingerprint_sees_through_normalization() {
        // Differently-messy but equal-after-normalization term lists must
        // fingerprint identically once normalized.
        let a = request(vec!["  Acme ", "acme", "Beta"]);
        let b = request(vec!["Acme", "Beta", " BETA "]);
        assert_eq!(fingerprint(b"doc", &a), fingerprint(b"doc", &b));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v: Value = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":[3,4]}}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"a":{"c":[3,4],"d":2},"b":1}"#);
    }

    #[test]
    fn get_marks_hit_and_preserves_timing() {
        let mut cache = CacheStore::new(4);
        cache.put("k".into(), &result("payload"));

        let hit = cache.get("k").expect("entry present");
        assert!(hit.metadata.cache_hit);
        assert_eq!(hit.metadata.timing.get("read_txt"), Some(&0.01));
        assert_eq!(hit.content, OutputContent::Text("payload".into()));

        // The stored copy itself is not flagged; a second get still hits.
        let again = cache.get("k").expect("still present");
        assert!(again.metadata.cache_hit);
    }

    #[test]
    fn eviction_is_strict_lru() {
        let mut cache = CacheStore::new(2);
        cache.put("a".into(), &result("a"));
        cache.put("b".into(), &result("b"));
        // Touch "a" so "b" becomes least-recently-used.
        cache.get("a");
        cache.put("c".into(), &result("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none(), "LRU entry should be evicted");
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let mut cache = CacheStore::new(0);
        cache.put("k".into(), &result("x"));
        assert!(cache.is_empty());
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn stored_copy_is_isolated_from_caller_mutation() {
        let mut cache = CacheStore::new(4);
        let mut r = result("original");
        cache.put("k".into(), &r);

        // Mutate the caller's copy after storing.
        r.metadata.timing.insert("ocr".into(), 99.0);
        r.content = OutputContent::Text("mutated".into());

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.content, OutputContent::Text("original".into()));
        assert!(hit.metadata.timing.get("ocr").is_none());
    }
}

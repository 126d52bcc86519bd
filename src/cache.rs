//! Content-hash keyed memoization of classification results.
//!
//! One cache instance is shared by every scan in the process, so identical
//! bytes reached through different messages (or different owners) are
//! extracted and classified exactly once per process lifetime. Concurrent
//! lookups for the same hash may race into a brief duplicate computation;
//! the last insert wins and the results are identical, so nothing corrupts.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::Classification;

/// Hex-encoded SHA-256 of the raw attachment bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Default)]
pub struct VerdictCache {
    entries: Mutex<HashMap<String, Classification>>,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &str) -> Option<Classification> {
        self.entries
            .lock()
            .expect("verdict cache mutex poisoned")
            .get(hash)
            .cloned()
    }

    pub fn insert(&self, classification: Classification) {
        self.entries
            .lock()
            .expect("verdict cache mutex poisoned")
            .insert(classification.content_hash.clone(), classification);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("verdict cache mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationVerdict, FieldGuesses};

    #[test]
    fn hash_is_stable_and_content_addressed() {
        let a = content_hash(b"same bytes");
        let b = content_hash(b"same bytes");
        let c = content_hash(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn insert_then_get_returns_identical_classification() {
        let cache = VerdictCache::new();
        let hash = content_hash(b"doc");
        let classification = Classification {
            content_hash: hash.clone(),
            verdict: ClassificationVerdict {
                is_warranty: true,
                confidence: 95,
                heuristic_score: 4,
                remote_label: Some("warranty".to_string()),
                reason: "remote and heuristic agree".to_string(),
            },
            guesses: FieldGuesses::default(),
        };

        assert!(cache.get(&hash).is_none());
        cache.insert(classification.clone());
        assert_eq!(cache.get(&hash), Some(classification));
        assert_eq!(cache.len(), 1);
    }
}

//! Memoized tokenization keyed by model and composed message string.
//!
//! Lookups take a read lock; a miss releases it, runs the tokenizer and then
//! inserts under a short write lock. Two concurrent misses on the same key
//! both compute and the second insert overwrites the first with an identical
//! value.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::MessageRole;

/// Cached token sequence.
pub type Tokens = Arc<Vec<u32>>;

/// Unbounded, process-lifetime tokenization cache.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<String, HashMap<String, Tokens>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable cache key for one message. Role, sender and content all take
    /// part, so an edited message never hits a stale entry.
    pub fn composed_key(role: MessageRole, sender: &str, content: &str) -> String {
        format!("{role}\u{1f}{sender}\u{1f}{content}")
    }

    /// Cached tokens, if present. Counts toward hit/miss statistics.
    pub fn get(&self, model: &str, key: &str) -> Option<Tokens> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(model)
            .and_then(|group| group.get(key))
            .cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn put(&self, model: &str, key: &str, tokens: Vec<u32>) -> Tokens {
        let tokens = Arc::new(tokens);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(model.to_string())
            .or_default()
            .insert(key.to_string(), Arc::clone(&tokens));
        tokens
    }

    /// Return cached tokens or run `compute` and store its result. No lock
    /// is held while `compute` runs. Failures are not cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        model: &str,
        key: &str,
        compute: F,
    ) -> Result<Tokens, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u32>, String>>,
    {
        if let Some(tokens) = self.get(model, key) {
            return Ok(tokens);
        }
        trace!("Token cache miss for model {model} ({} chars)", key.len());
        let tokens = compute().await?;
        Ok(self.put(model, key, tokens))
    }

    /// Number of cached entries across all models.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

//! Latest-exchange cache
//!
//! One [`CompletionCache`] is created by whoever owns the sessions and
//! handed (cloned) to each of them and to any consumer that wants the most
//! recent answer. Clones share state. Sessions writing to the same cache
//! concurrently are last-writer-wins.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// The most recent successful exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Raw completion text
    pub last_completion: String,
    /// Natural-language part of the completion
    pub last_explanation: String,
    /// Code snippet the question was asked about
    pub last_code: String,
    /// Revised code from the completion
    pub last_new_code: String,
    /// `last_new_code` with changes colored
    pub last_code_diff: String,
    /// Anything else the parse function returned
    pub last_extra: serde_json::Map<String, serde_json::Value>,
}

/// Shared handle to the latest exchange
#[derive(Debug, Clone)]
pub struct CompletionCache {
    entry: Arc<RwLock<CacheEntry>>,
    defaults: Arc<CacheEntry>,
}

impl CompletionCache {
    pub fn new() -> Self {
        Self::with_defaults(CacheEntry::default())
    }

    /// Start from `defaults`; `reset` returns to them.
    pub fn with_defaults(defaults: CacheEntry) -> Self {
        Self {
            entry: Arc::new(RwLock::new(defaults.clone())),
            defaults: Arc::new(defaults),
        }
    }

    /// Read one field by name (`last_code`, `last_extra`, ...)
    pub async fn get(&self, name: &str) -> Option<serde_json::Value> {
        let entry = self.entry.read().await;
        match serde_json::to_value(&*entry) {
            Ok(serde_json::Value::Object(mut fields)) => fields.remove(name),
            _ => None,
        }
    }

    /// Copy of the whole entry
    pub async fn snapshot(&self) -> CacheEntry {
        self.entry.read().await.clone()
    }

    pub async fn update(&self, entry: CacheEntry) {
        debug!(
            "Caching completion ({} chars, {} chars of code)",
            entry.last_completion.len(),
            entry.last_new_code.len()
        );
        *self.entry.write().await = entry;
    }

    /// Restore the defaults recorded at construction
    pub async fn reset(&self) {
        *self.entry.write().await = (*self.defaults).clone();
    }

    /// Whether an exchange has been cached since construction/reset
    pub async fn has_completion(&self) -> bool {
        !self.entry.read().await.last_completion.is_empty()
    }
}

impl Default for CompletionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_update_reset() {
        let cache = CompletionCache::new();
        assert_eq!(cache.get("last_code").await, Some(json!("")));
        assert_eq!(cache.get("no_such_field").await, None);
        assert!(!cache.has_completion().await);

        let shared = cache.clone();
        shared
            .update(CacheEntry {
                last_completion: "Because.\n```\nx = 1\n```".into(),
                last_new_code: "x = 1".into(),
                ..Default::default()
            })
            .await;
        assert_eq!(cache.get("last_new_code").await, Some(json!("x = 1")));
        assert!(cache.has_completion().await);

        cache.reset().await;
        assert_eq!(shared.snapshot().await, CacheEntry::default());
    }

    #[tokio::test]
    async fn test_reset_restores_custom_defaults() {
        let defaults = CacheEntry {
            last_explanation: "nothing yet".into(),
            ..Default::default()
        };
        let cache = CompletionCache::with_defaults(defaults.clone());
        cache
            .update(CacheEntry {
                last_explanation: "new".into(),
                ..Default::default()
            })
            .await;
        cache.reset().await;
        assert_eq!(cache.snapshot().await, defaults);
    }
}

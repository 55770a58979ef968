//! Remote keyed-blob cache abstraction
//!
//! A backend stores opaque payloads under string keys. Restore first tries
//! the exact key, then each restore key in order as a key prefix, picking
//! the newest entry under the first prefix that has any.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A restored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key actually matched (may differ from the requested one)
    pub key: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Listing information for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the cache can be used at all in this environment.
    async fn is_available(&self) -> bool;

    /// Store `payload` under `key`, replacing any existing entry.
    /// Returns a backend-specific identifier for the stored entry.
    async fn save(&self, key: &str, payload: &[u8]) -> Result<String>;

    /// Look up `key`, falling back to `restore_keys` as prefixes.
    async fn restore(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheEntry>>;

    /// Every entry whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>>;

    /// Remove `key`. Returns false when there was nothing to delete.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Pick the key a restore should return among `candidates`.
pub(crate) fn resolve_restore_key(
    key: &str,
    restore_keys: &[String],
    candidates: &[EntryInfo],
) -> Option<String> {
    if candidates.iter().any(|c| c.key == key) {
        return Some(key.to_string());
    }
    restore_keys.iter().find_map(|prefix| {
        candidates
            .iter()
            .filter(|c| c.key.starts_with(prefix.as_str()))
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.key.cmp(&b.key))
            })
            .map(|c| c.key.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn info(key: &str, age_secs: i64) -> EntryInfo {
        EntryInfo {
            key: key.to_string(),
            size_bytes: 1,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_exact_key_wins() {
        let candidates = vec![info("a-1", 10), info("a-2", 1)];
        let got = resolve_restore_key("a-1", &["a-".to_string()], &candidates);
        assert_eq!(got.as_deref(), Some("a-1"));
    }

    #[test]
    fn test_prefix_prefers_newest() {
        let candidates = vec![info("a-1", 10), info("a-2", 1), info("b-1", 0)];
        let got = resolve_restore_key("a-9", &["a-".to_string()], &candidates);
        assert_eq!(got.as_deref(), Some("a-2"));
    }

    #[test]
    fn test_restore_keys_in_order() {
        let candidates = vec![info("a-1", 10), info("b-1", 0)];
        let keys = vec!["c-".to_string(), "a-".to_string(), "b-".to_string()];
        let got = resolve_restore_key("zz", &keys, &candidates);
        assert_eq!(got.as_deref(), Some("a-1"));
    }

    #[test]
    fn test_miss() {
        assert_eq!(resolve_restore_key("k", &[], &[info("other", 0)]), None);
    }
}

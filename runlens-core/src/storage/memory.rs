//! In-process cache backend
//!
//! Used by tests and by one-off CLI runs that have no remote cache.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

use super::backend::{resolve_restore_key, CacheBackend, CacheEntry, EntryInfo};

#[derive(Debug)]
pub struct MemoryBackend {
    entries: DashMap<String, CacheEntry>,
    available: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle [`CacheBackend::is_available`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry with an explicit creation time.
    pub fn insert_entry(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    fn infos(&self, prefix: &str) -> Vec<EntryInfo> {
        let mut infos: Vec<EntryInfo> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| EntryInfo {
                key: e.key().clone(),
                size_bytes: e.value().payload.len() as u64,
                created_at: e.value().created_at,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn save(&self, key: &str, payload: &[u8]) -> Result<String> {
        self.insert_entry(CacheEntry {
            key: key.to_string(),
            payload: payload.to_vec(),
            created_at: Utc::now(),
        });
        Ok(key.to_string())
    }

    async fn restore(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheEntry>> {
        let candidates = self.infos("");
        Ok(resolve_restore_key(key, restore_keys, &candidates)
            .and_then(|matched| self.entries.get(&matched).map(|e| e.value().clone())))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
        Ok(self.infos(prefix))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

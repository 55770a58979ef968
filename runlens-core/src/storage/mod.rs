//! Keyed persistence of events and aggregates
//!
//! [`AnalyticsCache`] wraps a [`CacheBackend`] with the key scheme from
//! [`key`], the configured payload ceiling and retention, and converts every
//! failure into a structured outcome. None of its operations return `Err`
//! or panic on backend failure: telemetry must never fail the run.
//!
//! ```text
//!  store_events ──▶ validate ──▶ serialize ──▶ size check ──▶ backend.save
//!                      │              │             │              │
//!                      ▼              ▼             ▼              ▼
//!                 StoreOutcome { success: false, error } on any failure
//! ```

pub mod backend;
pub mod fs;
pub mod http;
pub mod key;
pub mod memory;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::error::{Error, Result};
use crate::types::{ensure_schema_version, AggregatedAnalytics, AnalyticsEvent};

pub use backend::{CacheBackend, CacheEntry, EntryInfo};
pub use fs::FsBackend;
pub use http::{HttpBackend, HttpBackendConfig};
pub use key::{generate_key, CacheKeyParams, CacheKeyType};
pub use memory::MemoryBackend;

/// Result of a store operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// The backend could not be used; nothing was attempted
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreOutcome {
    fn stored(key: String, size_bytes: u64) -> Self {
        Self {
            success: true,
            key: Some(key),
            size_bytes: Some(size_bytes),
            ..Self::default()
        }
    }

    pub(crate) fn failed(key: Option<String>, error: impl Into<String>) -> Self {
        Self {
            key,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

/// Result of a retrieve operation.
///
/// A miss is `{success: false, hit: false}` with no error. A hit whose
/// payload cannot be used is `{success: false, hit: true, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveOutcome<T> {
    pub success: bool,
    pub hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> RetrieveOutcome<T> {
    fn found(key: String, data: T) -> Self {
        Self {
            success: true,
            hit: true,
            key: Some(key),
            data: Some(data),
            unavailable: false,
            error: None,
        }
    }

    fn miss() -> Self {
        Self {
            success: false,
            hit: false,
            key: None,
            data: None,
            unavailable: false,
            error: None,
        }
    }

    fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::miss()
        }
    }

    fn failed(hit: bool, key: Option<String>, error: impl Into<String>) -> Self {
        Self {
            hit,
            key,
            error: Some(error.into()),
            ..Self::miss()
        }
    }
}

/// Totals over stored entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub success: bool,
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub events_entries: usize,
    pub aggregated_entries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_entry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_entry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearOutcome {
    pub success: bool,
    pub deleted: usize,
    pub failed: usize,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event and aggregate persistence on top of a cache backend.
#[derive(Clone)]
pub struct AnalyticsCache {
    backend: Arc<dyn CacheBackend>,
    config: Arc<AnalyticsConfig>,
}

impl AnalyticsCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: Arc<AnalyticsConfig>) -> Self {
        Self { backend, config }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn params(&self, repository: &str, key_type: CacheKeyType) -> CacheKeyParams {
        CacheKeyParams::new(self.config.cache_key_prefix(), repository, key_type)
    }

    /// Key under which one day's events of `repository` are stored.
    pub fn events_key(&self, repository: &str, date: DateTime<Utc>) -> String {
        generate_key(&self.params(repository, CacheKeyType::Events).with_timestamp(date))
    }

    /// Key under which an aggregate ending on `date` is stored.
    pub fn aggregated_key(&self, repository: &str, date: Option<DateTime<Utc>>) -> String {
        let mut params = self.params(repository, CacheKeyType::Aggregated);
        params.timestamp = date;
        generate_key(&params)
    }

    /// Prefix of every key this cache writes.
    fn namespace(&self) -> String {
        format!("{}{}", self.config.cache_key_prefix(), key::KEY_SEPARATOR)
    }

    async fn check_available(&self) -> bool {
        let available = self.backend.is_available().await;
        if !available {
            tracing::info!(backend = self.backend.name(), "Cache unavailable; skipping");
        }
        available
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(value)?;
        let limit = self.config.max_data_size();
        if payload.len() as u64 > limit {
            return Err(Error::Store(format!(
                "payload of {} bytes exceeds maxDataSize of {} bytes",
                payload.len(),
                limit
            )));
        }
        Ok(payload)
    }

    async fn save(&self, key: String, payload: Vec<u8>) -> StoreOutcome {
        let size = payload.len() as u64;
        match self.backend.save(&key, &payload).await {
            Ok(id) => {
                tracing::info!(key = %key, id = %id, size_bytes = size, "Stored analytics");
                StoreOutcome::stored(key, size)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to store analytics");
                StoreOutcome::failed(Some(key), e.to_string())
            }
        }
    }

    async fn restore<T: DeserializeOwned>(
        &self,
        key: String,
        restore_keys: Vec<String>,
        check: impl Fn(&T) -> Result<()>,
    ) -> RetrieveOutcome<T> {
        if !self.check_available().await {
            return RetrieveOutcome::unavailable();
        }

        let entry = match self.backend.restore(&key, &restore_keys).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(key = %key, "Cache miss");
                return RetrieveOutcome::miss();
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to restore analytics");
                return RetrieveOutcome::failed(false, Some(key), e.to_string());
            }
        };

        let decoded = serde_json::from_slice::<T>(&entry.payload)
            .map_err(Error::from)
            .and_then(|data| check(&data).map(|()| data));
        match decoded {
            Ok(data) => RetrieveOutcome::found(entry.key, data),
            Err(e) => {
                tracing::warn!(key = %entry.key, error = %e, "Stored analytics unusable");
                RetrieveOutcome::failed(true, Some(entry.key), e.to_string())
            }
        }
    }

    /// Persist one day's events of `repository`.
    ///
    /// The date bucket is taken from the first event. An existing entry
    /// under the same key is replaced.
    pub async fn store_events(&self, repository: &str, events: &[AnalyticsEvent]) -> StoreOutcome {
        let Some(first) = events.first() else {
            return StoreOutcome::failed(None, "cannot store an empty event list");
        };
        if !self.check_available().await {
            return StoreOutcome::unavailable();
        }

        let key = self.events_key(repository, first.timestamp);
        match self.encode(events) {
            Ok(payload) => self.save(key, payload).await,
            Err(e) => StoreOutcome::failed(Some(key), e.to_string()),
        }
    }

    /// Load the events of `repository` stored for the day of `date`.
    pub async fn retrieve_events(
        &self,
        repository: &str,
        date: DateTime<Utc>,
    ) -> RetrieveOutcome<Vec<AnalyticsEvent>> {
        let key = self.events_key(repository, date);
        self.restore(key, Vec::new(), |events: &Vec<AnalyticsEvent>| {
            events
                .iter()
                .try_for_each(|e| ensure_schema_version(&e.schema_version))
        })
        .await
    }

    /// Persist an aggregate, bucketed by the day its period ends.
    pub async fn store_aggregated(
        &self,
        repository: &str,
        aggregate: &AggregatedAnalytics,
    ) -> StoreOutcome {
        if !self.check_available().await {
            return StoreOutcome::unavailable();
        }
        let key = self.aggregated_key(repository, Some(aggregate.period_end));
        match self.encode(aggregate) {
            Ok(payload) => self.save(key, payload).await,
            Err(e) => StoreOutcome::failed(Some(key), e.to_string()),
        }
    }

    /// Load the aggregate for `date`, or the newest one when that day has
    /// none (or `date` is `None`).
    pub async fn retrieve_aggregated(
        &self,
        repository: &str,
        date: Option<DateTime<Utc>>,
    ) -> RetrieveOutcome<AggregatedAnalytics> {
        let key = self.aggregated_key(repository, date);
        let fallback = format!(
            "{}{}",
            self.aggregated_key(repository, None),
            key::KEY_SEPARATOR
        );
        self.restore(key, vec![fallback], |aggregate: &AggregatedAnalytics| {
            ensure_schema_version(&aggregate.schema_version)
        })
        .await
    }

    /// Stored keys of `repository`, sorted. Empty when the cache is
    /// unreachable.
    pub async fn list_keys(&self, repository: &str) -> Vec<String> {
        match self.repository_entries(repository).await {
            Ok(entries) => entries.into_iter().map(|e| e.key).collect(),
            Err(e) => {
                tracing::warn!(repository, error = %e, "Failed to list keys");
                Vec::new()
            }
        }
    }

    async fn repository_entries(&self, repository: &str) -> Result<Vec<EntryInfo>> {
        if !self.check_available().await {
            return Ok(Vec::new());
        }
        let prefix = key::repository_prefix(self.config.cache_key_prefix(), repository);
        let mut entries = self.backend.list(&prefix).await?;
        entries.retain(|e| key::key_type_of(&e.key, &prefix).is_some());
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Size and count of stored entries, for one repository or for every
    /// key under the configured prefix.
    pub async fn storage_stats(&self, repository: Option<&str>) -> StorageStats {
        if !self.check_available().await {
            return StorageStats {
                unavailable: true,
                ..StorageStats::default()
            };
        }

        let listed = match repository {
            Some(repository) => self.repository_entries(repository).await,
            None => self.backend.list(&self.namespace()).await,
        };
        let entries = match listed {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compute storage stats");
                return StorageStats {
                    error: Some(e.to_string()),
                    ..StorageStats::default()
                };
            }
        };

        StorageStats {
            success: true,
            entry_count: entries.len(),
            total_size_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            events_entries: entries
                .iter()
                .filter(|e| key::trailing_key_type(&e.key) == Some(CacheKeyType::Events))
                .count(),
            aggregated_entries: entries
                .iter()
                .filter(|e| key::trailing_key_type(&e.key) == Some(CacheKeyType::Aggregated))
                .count(),
            oldest_entry: entries.iter().map(|e| e.created_at).min(),
            newest_entry: entries.iter().map(|e| e.created_at).max(),
            unavailable: false,
            error: None,
        }
    }

    /// Delete every stored entry of `repository`.
    pub async fn clear_repository(&self, repository: &str) -> ClearOutcome {
        if !self.check_available().await {
            return ClearOutcome {
                unavailable: true,
                ..ClearOutcome::default()
            };
        }
        match self.repository_entries(repository).await {
            Ok(entries) => self.delete_all(entries).await,
            Err(e) => ClearOutcome {
                error: Some(e.to_string()),
                ..ClearOutcome::default()
            },
        }
    }

    /// Delete entries older than `retentionDays` relative to `now`.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> ClearOutcome {
        if !self.check_available().await {
            return ClearOutcome {
                unavailable: true,
                ..ClearOutcome::default()
            };
        }
        let cutoff = now - Duration::days(i64::from(self.config.retention_days()));
        match self.backend.list(&self.namespace()).await {
            Ok(entries) => {
                let expired = entries
                    .into_iter()
                    .filter(|e| e.created_at < cutoff)
                    .collect();
                self.delete_all(expired).await
            }
            Err(e) => ClearOutcome {
                error: Some(e.to_string()),
                ..ClearOutcome::default()
            },
        }
    }

    async fn delete_all(&self, entries: Vec<EntryInfo>) -> ClearOutcome {
        let mut outcome = ClearOutcome::default();
        for entry in entries {
            match self.backend.delete(&entry.key).await {
                Ok(true) => outcome.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "Failed to delete entry");
                    outcome.failed += 1;
                    outcome.error.get_or_insert_with(|| e.to_string());
                }
            }
        }
        outcome.success = outcome.failed == 0;
        tracing::info!(
            deleted = outcome.deleted,
            failed = outcome.failed,
            "Deleted cache entries"
        );
        outcome
    }
}

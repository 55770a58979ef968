//! End-of-run telemetry
//!
//! [`RunTelemetry`] owns everything one run needs: the operation stores that
//! instrumentation writes into, the [`MetricsManager`] that drains them, and
//! the [`AnalyticsCache`] the resulting event is persisted to.
//!
//! ```rust,ignore
//! let telemetry = RunTelemetry::new(config, backend);
//! telemetry.stores().cache.record_restore(key, true, None, start, end);
//! // ...
//! let report = telemetry.finish(&ctx, action).await;
//! ```

use std::sync::Arc;

use crate::collector::OperationStores;
use crate::config::AnalyticsConfig;
use crate::context::CollectionContext;
use crate::manager::MetricsManager;
use crate::storage::{AnalyticsCache, CacheBackend, StoreOutcome};
use crate::types::{ActionMetrics, AnalyticsEvent};

/// Result of [`RunTelemetry::finish`].
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The event built for this run
    pub event: AnalyticsEvent,
    /// Persistence outcome; `None` when analytics is disabled
    pub store: Option<StoreOutcome>,
}

impl RunReport {
    /// Whether the event reached the cache.
    pub fn persisted(&self) -> bool {
        self.store.as_ref().is_some_and(|s| s.success)
    }
}

/// Collection and persistence for one run.
pub struct RunTelemetry {
    config: Arc<AnalyticsConfig>,
    stores: OperationStores,
    manager: MetricsManager,
    cache: AnalyticsCache,
}

impl RunTelemetry {
    pub fn new(config: Arc<AnalyticsConfig>, backend: Arc<dyn CacheBackend>) -> Self {
        let stores = OperationStores::new();
        let manager = MetricsManager::new(Arc::clone(&config), &stores);
        let cache = AnalyticsCache::new(backend, Arc::clone(&config));
        Self {
            config,
            stores,
            manager,
            cache,
        }
    }

    /// Stores shared with instrumentation sites.
    pub fn stores(&self) -> &OperationStores {
        &self.stores
    }

    pub fn manager(&self) -> &MetricsManager {
        &self.manager
    }

    pub fn cache(&self) -> &AnalyticsCache {
        &self.cache
    }

    /// Collect every metric of the run and persist the resulting event.
    ///
    /// The event is appended to the events already stored for the same
    /// repository and day. When those cannot be read the day is left as it
    /// is and the event is not stored. Never fails: persistence problems are
    /// reported in [`RunReport::store`] and logged.
    pub async fn finish(&self, ctx: &CollectionContext, action: ActionMetrics) -> RunReport {
        let metrics = self.manager.collect_all(ctx);
        let event = AnalyticsEvent::new(
            ctx.repository.clone(),
            ctx.workflow.clone(),
            metrics,
            action,
        );

        if !self.config.enabled() {
            tracing::debug!("Analytics disabled, event not persisted");
            return RunReport { event, store: None };
        }

        let repository = event.repository.full_name.clone();
        let outcome = self.append_event(&repository, &event).await;
        if outcome.unavailable {
            tracing::info!(backend = self.cache.backend_name(), "Cache unavailable, skipped");
        } else if !outcome.success {
            tracing::warn!(
                repository = %repository,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Failed to store run telemetry"
            );
        }

        RunReport {
            event,
            store: Some(outcome),
        }
    }

    async fn append_event(&self, repository: &str, event: &AnalyticsEvent) -> StoreOutcome {
        let existing = self.cache.retrieve_events(repository, event.timestamp).await;
        if let Some(error) = existing.error {
            // The stored day may still be intact on the backend
            return StoreOutcome::failed(
                existing.key,
                format!("stored events unreadable, not overwriting: {error}"),
            );
        }

        let mut events = existing.data.unwrap_or_default();
        events.push(event.clone());

        let outcome = self.cache.store_events(repository, &events).await;
        if outcome.success {
            tracing::info!(
                repository,
                key = outcome.key.as_deref().unwrap_or_default(),
                events = events.len(),
                "Run telemetry stored"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::test_support::{config, context};
    use crate::collector::ApiOutcome;
    use crate::config::KEY_ENABLED;
    use crate::error::{Error, Result};
    use crate::storage::{CacheEntry, EntryInfo, MemoryBackend};
    use crate::types::{ApiOperation, FailureCategory};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn action() -> ActionMetrics {
        ActionMetrics {
            duration_ms: 4_000,
            success: false,
            tool_version: "2.1.0".to_string(),
            exit_code: 1,
            repositories_processed: Some(3),
            pull_requests_created: Some(1),
            dependencies_updated: None,
        }
    }

    #[tokio::test]
    async fn test_finish_collects_and_persists() {
        let cfg = config(&[]);
        let backend = Arc::new(MemoryBackend::new());
        let telemetry = RunTelemetry::new(Arc::clone(&cfg), backend.clone());

        let end = Utc::now();
        let start = end - Duration::milliseconds(250);
        telemetry.stores().cache.record_restore("deps-abc", true, Some(512), start, end);
        telemetry.stores().api.record_request(
            ApiOperation::Post,
            "/repos/octo/widgets/pulls?access_token=x",
            ApiOutcome::status(201),
            start,
            end,
        );
        telemetry.stores().failures.record_failure(
            "connect ETIMEDOUT 10.0.0.1:443",
            "api",
            true,
            serde_json::Value::Null,
        );

        let report = telemetry.finish(&context(cfg), action()).await;

        assert!(report.persisted());
        assert_eq!(report.event.cache_metrics.len(), 1);
        assert_eq!(report.event.api_metrics.len(), 1);
        assert_eq!(report.event.failure_metrics[0].category, FailureCategory::Network);
        assert_eq!(telemetry.stores().pending(), 0);
        assert_eq!(backend.len(), 1);

        let stored = telemetry
            .cache()
            .retrieve_events("octo/widgets", report.event.timestamp)
            .await;
        assert_eq!(stored.data.unwrap(), vec![report.event]);
    }

    #[tokio::test]
    async fn test_second_run_appends_to_day() {
        let cfg = config(&[]);
        let telemetry = RunTelemetry::new(Arc::clone(&cfg), Arc::new(MemoryBackend::new()));
        let ctx = context(cfg);

        let first = telemetry.finish(&ctx, action()).await;
        let second = telemetry.finish(&ctx, action()).await;
        assert!(first.persisted() && second.persisted());

        let stored = telemetry
            .cache()
            .retrieve_events("octo/widgets", second.event.timestamp)
            .await
            .data
            .unwrap();
        let ids: Vec<_> = stored.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![first.event.id.as_str(), second.event.id.as_str()]);
    }

    #[tokio::test]
    async fn test_disabled_skips_persistence() {
        let cfg = config(&[(KEY_ENABLED, "false")]);
        let backend = Arc::new(MemoryBackend::new());
        let telemetry = RunTelemetry::new(Arc::clone(&cfg), backend.clone());
        telemetry
            .stores()
            .failures
            .record_failure("boom", "tool", false, serde_json::Value::Null);

        let report = telemetry.finish(&context(cfg), action()).await;

        assert!(report.store.is_none());
        assert!(report.event.failure_metrics.is_empty());
        assert!(backend.is_empty());
    }

    /// Memory backend whose reads can be switched to fail.
    #[derive(Default)]
    struct FlakyReads {
        inner: MemoryBackend,
        fail_restore: AtomicBool,
    }

    #[async_trait]
    impl CacheBackend for FlakyReads {
        fn name(&self) -> &'static str {
            "flaky-reads"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn save(&self, key: &str, payload: &[u8]) -> Result<String> {
            self.inner.save(key, payload).await
        }

        async fn restore(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheEntry>> {
            if self.fail_restore.load(Ordering::SeqCst) {
                return Err(Error::Store("Network error".to_string()));
            }
            self.inner.restore(key, restore_keys).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
            self.inner.list(prefix).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_unreadable_day_is_not_overwritten() {
        let cfg = config(&[]);
        let backend = Arc::new(FlakyReads::default());
        let telemetry = RunTelemetry::new(Arc::clone(&cfg), backend.clone());
        let ctx = context(cfg);

        assert!(telemetry.finish(&ctx, action()).await.persisted());
        assert!(telemetry.finish(&ctx, action()).await.persisted());

        backend.fail_restore.store(true, Ordering::SeqCst);
        let third = telemetry.finish(&ctx, action()).await;
        let store = third.store.as_ref().unwrap();
        assert!(!third.persisted());
        assert!(!store.unavailable);
        assert!(store.error.as_deref().unwrap().contains("Network error"));

        backend.fail_restore.store(false, Ordering::SeqCst);
        let stored = telemetry
            .cache()
            .retrieve_events("octo/widgets", third.event.timestamp)
            .await;
        assert_eq!(stored.data.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_other_schema_day_is_not_overwritten() {
        let cfg = config(&[]);
        let telemetry = RunTelemetry::new(Arc::clone(&cfg), Arc::new(MemoryBackend::new()));
        let ctx = context(cfg);

        let first = telemetry.finish(&ctx, action()).await;
        let mut old = first.event.clone();
        old.schema_version = "0.1.0".to_string();
        assert!(telemetry.cache().store_events("octo/widgets", &[old]).await.success);

        let second = telemetry.finish(&ctx, action()).await;
        assert!(!second.persisted());
        assert!(second.store.unwrap().error.unwrap().contains("schema"));
    }

    #[tokio::test]
    async fn test_unavailable_backend_never_fails_the_run() {
        let cfg = config(&[]);
        let backend = Arc::new(MemoryBackend::new());
        backend.set_available(false);
        let telemetry = RunTelemetry::new(Arc::clone(&cfg), backend);

        let report = telemetry.finish(&context(cfg), action()).await;

        let store = report.store.unwrap();
        assert!(!store.success);
        assert!(store.unavailable);
        assert!(store.error.is_none());
    }
}

//! Metrics manager
//!
//! Registry of the four collectors and the single entry point used at the
//! end of a run to gather everything into a [`MetricsBundle`].
//!
//! ```rust,ignore
//! let stores = OperationStores::new();
//! let manager = MetricsManager::new(config, &stores);
//! // ... instrumentation writes into `stores` during the run ...
//! let bundle = manager.collect_all(&ctx);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::collector::{
    ApiCollector, CacheCollector, CollectedMetrics, CollectorKind, DockerCollector,
    FailureCollector, MetricsCollector, OperationStores,
};
use crate::config::AnalyticsConfig;
use crate::context::CollectionContext;
use crate::types::MetricsBundle;

/// Holds exactly one collector per [`CollectorKind`].
pub struct MetricsManager {
    collectors: Vec<Box<dyn MetricsCollector>>,
}

impl MetricsManager {
    /// Create a manager with the built-in collectors reading from `stores`.
    pub fn new(config: Arc<AnalyticsConfig>, stores: &OperationStores) -> Self {
        let mut manager = Self {
            collectors: Vec::with_capacity(CollectorKind::ALL.len()),
        };
        manager.register(Box::new(CacheCollector::new(
            Arc::clone(&config),
            Arc::clone(&stores.cache),
        )));
        manager.register(Box::new(DockerCollector::new(
            Arc::clone(&config),
            Arc::clone(&stores.docker),
        )));
        manager.register(Box::new(ApiCollector::new(
            Arc::clone(&config),
            Arc::clone(&stores.api),
        )));
        manager.register(Box::new(FailureCollector::new(
            config,
            Arc::clone(&stores.failures),
        )));
        manager
    }

    /// Register a collector, replacing any existing one of the same kind.
    pub fn register(&mut self, collector: Box<dyn MetricsCollector>) {
        let kind = collector.kind();
        tracing::debug!(collector = collector.name(), "Registered collector");
        match self.collectors.iter_mut().find(|c| c.kind() == kind) {
            Some(slot) => *slot = collector,
            None => self.collectors.push(collector),
        }
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Run every collector and bundle the results.
    ///
    /// A collector that errors or panics contributes an empty list; the
    /// others are unaffected. Every key of the bundle is always present.
    pub fn collect_all(&self, ctx: &CollectionContext) -> MetricsBundle {
        let start = Instant::now();
        let mut bundle = MetricsBundle::default();

        for collector in &self.collectors {
            let name = collector.name();
            let result = catch_unwind(AssertUnwindSafe(|| collector.collect(ctx)));
            let collected = match result {
                Ok(Ok(collected)) => collected,
                Ok(Err(e)) => {
                    tracing::warn!(collector = name, error = %e, "Collector failed");
                    continue;
                }
                Err(panic) => {
                    tracing::error!(
                        collector = name,
                        panic = %panic_message(panic.as_ref()),
                        "Collector panicked"
                    );
                    continue;
                }
            };

            if collected.kind() != collector.kind() {
                tracing::warn!(
                    collector = name,
                    returned = %collected.kind(),
                    "Collector returned metrics of another kind; discarding"
                );
                continue;
            }

            match collected {
                CollectedMetrics::Cache(m) => bundle.cache = m,
                CollectedMetrics::Docker(m) => bundle.docker = m,
                CollectedMetrics::Api(m) => bundle.api = m,
                CollectedMetrics::Failures(m) => bundle.failures = m,
            }
        }

        tracing::info!(
            repository = %ctx.repository.full_name,
            run_id = ctx.workflow.run_id,
            cache = bundle.cache.len(),
            docker = bundle.docker.len(),
            api = bundle.api.len(),
            failures = bundle.failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Collected run metrics"
        );

        bundle
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

//! Collector framework
//!
//! A collector turns the raw operation records of one category into
//! sanitized, immutable metric records.
//!
//! ```text
//!  instrumentation sites            end of run
//!  ─────────────────────            ──────────
//!  cache.record_start(..)   ──┐
//!  docker.record(..)        ──┼──▶ OperationStores ──▶ collector.collect(ctx)
//!  api.record_end(..)       ──┤                          │  is_enabled?
//!  failures.record_failure  ──┘                          │  should_sample?
//!                                                        │  drain + transform + sanitize
//!                                                        ▼
//!                                                   Vec<metric>
//! ```
//!
//! Collection is skipped (empty result, store untouched) when analytics or
//! the collector's own flag is off, or when the sample gate rejects the
//! cycle. A record whose transform fails is logged and skipped; it never
//! aborts the rest of the collection.

pub mod api;
pub mod cache;
pub mod classify;
pub mod docker;
pub mod failure;
pub mod store;

use rand::Rng;
use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::context::CollectionContext;
use crate::error::Result;
use crate::sanitize::Sanitizer;
use crate::types::{ApiMetrics, CacheMetrics, DockerMetrics, FailureMetrics};

pub use api::{ApiCollector, ApiOperationRecord, ApiOutcome};
pub use cache::{CacheCollector, CacheOperationRecord, CacheOutcome};
pub use classify::{classify, Classification};
pub use docker::{DockerCollector, DockerOperationRecord, DockerOutcome};
pub use failure::{FailureCollector, FailureRecord};
pub use store::{operation_id, OperationRecord, OperationStore, OperationStores};

/// The four collector categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    Cache,
    Docker,
    Api,
    Failures,
}

impl CollectorKind {
    pub const ALL: [CollectorKind; 4] = [
        CollectorKind::Cache,
        CollectorKind::Docker,
        CollectorKind::Api,
        CollectorKind::Failures,
    ];

    /// Registry name, also the key in the collected bundle.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorKind::Cache => "cache",
            CollectorKind::Docker => "docker",
            CollectorKind::Api => "api",
            CollectorKind::Failures => "failures",
        }
    }

    /// Whether this category's own flag is on.
    pub fn flag(&self, config: &AnalyticsConfig) -> bool {
        match self {
            CollectorKind::Cache => config.collect_cache(),
            CollectorKind::Docker => config.collect_docker(),
            CollectorKind::Api => config.collect_api(),
            CollectorKind::Failures => config.collect_failures(),
        }
    }
}

impl std::fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single collector.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectedMetrics {
    Cache(Vec<CacheMetrics>),
    Docker(Vec<DockerMetrics>),
    Api(Vec<ApiMetrics>),
    Failures(Vec<FailureMetrics>),
}

impl CollectedMetrics {
    /// Empty output for `kind`.
    pub fn empty(kind: CollectorKind) -> Self {
        match kind {
            CollectorKind::Cache => CollectedMetrics::Cache(Vec::new()),
            CollectorKind::Docker => CollectedMetrics::Docker(Vec::new()),
            CollectorKind::Api => CollectedMetrics::Api(Vec::new()),
            CollectorKind::Failures => CollectedMetrics::Failures(Vec::new()),
        }
    }

    pub fn kind(&self) -> CollectorKind {
        match self {
            CollectedMetrics::Cache(_) => CollectorKind::Cache,
            CollectedMetrics::Docker(_) => CollectorKind::Docker,
            CollectedMetrics::Api(_) => CollectorKind::Api,
            CollectedMetrics::Failures(_) => CollectorKind::Failures,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CollectedMetrics::Cache(m) => m.len(),
            CollectedMetrics::Docker(m) => m.len(),
            CollectedMetrics::Api(m) => m.len(),
            CollectedMetrics::Failures(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait implemented by every collector.
///
/// Collectors are cheap to call and read only their own store, so the
/// manager may call them in any order.
pub trait MetricsCollector: Send + Sync {
    /// Registry name (`cache`, `docker`, `api`, `failures`).
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn kind(&self) -> CollectorKind;

    /// True only if analytics is on globally and for this collector.
    fn is_enabled(&self) -> bool;

    /// Drain this collector's store into metric records.
    fn collect(&self, ctx: &CollectionContext) -> Result<CollectedMetrics>;
}

/// Probabilistic gate: `>= 1` always passes, `<= 0` never does, otherwise
/// passes with probability `rate`.
pub fn should_sample<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> bool {
    if rate >= 1.0 {
        true
    } else if rate <= 0.0 || rate.is_nan() {
        false
    } else {
        rng.gen::<f64>() < rate
    }
}

/// State and behaviour shared by the concrete collectors.
#[derive(Debug, Clone)]
pub struct CollectorBase {
    kind: CollectorKind,
    config: Arc<AnalyticsConfig>,
    sanitizer: Sanitizer,
}

impl CollectorBase {
    pub fn new(kind: CollectorKind, config: Arc<AnalyticsConfig>) -> Self {
        let sanitizer = Sanitizer::from_config(&config);
        Self {
            kind,
            config,
            sanitizer,
        }
    }

    pub fn kind(&self) -> CollectorKind {
        self.kind
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled() && self.kind.flag(&self.config)
    }

    pub fn should_sample(&self) -> bool {
        should_sample(self.config.sample_rate(), &mut rand::thread_rng())
    }

    /// Drain `store` through `transform`, honouring the enable and sample
    /// gates. Records whose transform fails are logged and skipped.
    pub fn gather<R, M, F>(
        &self,
        ctx: &CollectionContext,
        store: &OperationStore<R>,
        transform: F,
    ) -> Vec<M>
    where
        R: OperationRecord,
        F: Fn(&str, R) -> Result<M>,
    {
        if !self.is_enabled() {
            tracing::debug!(collector = %self.kind, "Collector disabled, skipping");
            return Vec::new();
        }
        if !self.should_sample() {
            tracing::debug!(
                collector = %self.kind,
                sample_rate = self.config.sample_rate(),
                "Collection cycle not sampled"
            );
            return Vec::new();
        }

        let records = store.drain();
        let total = records.len();
        let mut metrics = Vec::with_capacity(total);

        for (id, record) in records {
            match transform(&id, record) {
                Ok(metric) => metrics.push(metric),
                Err(e) => {
                    tracing::warn!(
                        collector = %self.kind,
                        operation_id = %id,
                        error = %e,
                        "Skipping operation record"
                    );
                }
            }
        }

        tracing::debug!(
            collector = %self.kind,
            repository = %ctx.repository.full_name,
            run_id = ctx.workflow.run_id,
            records = total,
            metrics = metrics.len(),
            "Collected metrics"
        );

        metrics
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_should_sample_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(should_sample(1.0, &mut rng));
            assert!(should_sample(1.5, &mut rng));
            assert!(!should_sample(0.0, &mut rng));
            assert!(!should_sample(-1.0, &mut rng));
        }
    }

    #[test]
    fn test_should_sample_is_probabilistic() {
        let mut rng = StdRng::seed_from_u64(42);
        let hits = (0..10_000)
            .filter(|_| should_sample(0.3, &mut rng))
            .count();
        assert!((2_500..3_500).contains(&hits), "got {hits}");
    }

    #[test]
    fn test_is_enabled_requires_both_flags() {
        let on = CollectorBase::new(CollectorKind::Cache, test_support::config(&[]));
        assert!(on.is_enabled());

        let global_off = CollectorBase::new(
            CollectorKind::Cache,
            test_support::config(&[("enabled", "false")]),
        );
        assert!(!global_off.is_enabled());

        let kind_off = CollectorBase::new(
            CollectorKind::Api,
            test_support::config(&[("collectApi", "false")]),
        );
        assert!(!kind_off.is_enabled());
    }

    #[test]
    fn test_collector_kind_names() {
        let names: Vec<_> = CollectorKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["cache", "docker", "api", "failures"]);
    }
}

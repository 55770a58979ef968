//! # runlens-core
//!
//! Core library for runlens - telemetry for CI automation runs.
//!
//! This library provides:
//! - Collectors for cache, container, remote API and failure telemetry
//! - Pattern-based failure classification
//! - Keyed persistence of run events in a remote or local cache
//! - Cross-run aggregation and merging of aggregates
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through four stages:
//! - **Record:** instrumentation writes raw operations into [`collector::OperationStores`]
//! - **Collect:** [`MetricsManager`] drains the stores into sanitized metrics
//! - **Persist:** [`AnalyticsCache`] stores one [`AnalyticsEvent`] per run under a
//!   repository and day scoped key
//! - **Aggregate:** [`analytics`] rolls events up and merges aggregates
//!
//! Telemetry never fails the run it observes: collection isolates broken
//! collectors and every store operation reports a structured outcome.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runlens_core::context::CollectionContext;
//! use runlens_core::storage::FsBackend;
//! use runlens_core::{ActionMetrics, AnalyticsConfig, RunTelemetry};
//!
//! # async fn run() -> runlens_core::Result<()> {
//! let config = Arc::new(AnalyticsConfig::load()?);
//! let backend = Arc::new(FsBackend::default_location());
//! let telemetry = RunTelemetry::new(Arc::clone(&config), backend);
//!
//! // ... the run records operations into telemetry.stores() ...
//!
//! let ctx = CollectionContext::from_env(config)?;
//! let action = ActionMetrics {
//!     duration_ms: 42_000,
//!     success: true,
//!     tool_version: "1.0.0".to_string(),
//!     exit_code: 0,
//!     repositories_processed: Some(1),
//!     pull_requests_created: None,
//!     dependencies_updated: None,
//! };
//! let report = telemetry.finish(&ctx, action).await;
//! println!("stored: {}", report.persisted());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::AnalyticsConfig;
pub use error::{Error, Result};
pub use manager::MetricsManager;
pub use pipeline::{RunReport, RunTelemetry};
pub use storage::AnalyticsCache;
pub use types::*;

// Public modules
pub mod analytics;
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod manager;
pub mod pipeline;
pub mod sanitize;
pub mod storage;
pub mod types;

//! Container operation collector
//!
//! The container launcher itself lives outside this crate; it reports image
//! pulls, tool runs and cleanups here through the recording API.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::context::CollectionContext;
use crate::error::Result;
use crate::types::{DockerMetrics, DockerOperation};

use super::store::{completed_span, operation_id, OperationRecord, OperationStore};
use super::{CollectedMetrics, CollectorBase, CollectorKind, MetricsCollector};

/// Raw container operation as written by instrumentation.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerOperationRecord {
    pub operation: DockerOperation,
    pub image: String,
    pub tool: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Option<DockerOutcome>,
}

impl OperationRecord for DockerOperationRecord {
    fn started_at(&self) -> DateTime<Utc> {
        self.start_time
    }
}

/// How a container operation ended.
#[derive(Debug, Clone, PartialEq)]
pub struct DockerOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl DockerOutcome {
    /// Outcome derived from a process exit code; zero is success.
    pub fn exited(exit_code: i32) -> Self {
        Self {
            success: exit_code == 0,
            exit_code: Some(exit_code),
            error: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn success() -> Self {
        Self {
            success: true,
            exit_code: None,
            error: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::success()
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl OperationStore<DockerOperationRecord> {
    /// Mark the start of a container operation.
    pub fn record_start(
        &self,
        id: &str,
        operation: DockerOperation,
        image: &str,
        tool: Option<&str>,
    ) {
        self.insert(
            id,
            DockerOperationRecord {
                operation,
                image: image.to_string(),
                tool: tool.map(str::to_string),
                start_time: Utc::now(),
                end_time: None,
                outcome: None,
            },
        );
    }

    /// Mark the end of a container operation started with `record_start`.
    ///
    /// Without a matching start the operation is recorded with zero duration.
    pub fn record_end(
        &self,
        id: &str,
        operation: DockerOperation,
        image: &str,
        outcome: DockerOutcome,
    ) {
        let now = Utc::now();
        self.upsert_with(
            id,
            || DockerOperationRecord {
                operation,
                image: image.to_string(),
                tool: None,
                start_time: now,
                end_time: None,
                outcome: None,
            },
            |record| {
                record.end_time = Some(now);
                record.outcome = Some(outcome);
            },
        );
    }

    /// Record a finished operation in one call.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        id: &str,
        operation: DockerOperation,
        image: &str,
        tool: Option<&str>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        outcome: DockerOutcome,
    ) {
        self.insert(
            id,
            DockerOperationRecord {
                operation,
                image: image.to_string(),
                tool: tool.map(str::to_string),
                start_time,
                end_time: Some(end_time),
                outcome: Some(outcome),
            },
        );
    }

    /// Record a finished image pull; returns the generated operation id.
    pub fn record_pull(
        &self,
        image: &str,
        outcome: DockerOutcome,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> String {
        let id = operation_id(DockerOperation::Pull.as_str(), image);
        self.record(
            &id,
            DockerOperation::Pull,
            image,
            None,
            start_time,
            end_time,
            outcome,
        );
        id
    }

    /// Record a finished tool run inside a container; returns the operation id.
    pub fn record_tool_run(
        &self,
        image: &str,
        tool: &str,
        exit_code: i32,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> String {
        let id = operation_id(DockerOperation::Run.as_str(), tool);
        self.record(
            &id,
            DockerOperation::Run,
            image,
            Some(tool),
            start_time,
            end_time,
            DockerOutcome::exited(exit_code),
        );
        id
    }
}

/// Collector for container operations.
pub struct DockerCollector {
    base: CollectorBase,
    store: Arc<OperationStore<DockerOperationRecord>>,
}

impl DockerCollector {
    pub fn new(
        config: Arc<AnalyticsConfig>,
        store: Arc<OperationStore<DockerOperationRecord>>,
    ) -> Self {
        Self {
            base: CollectorBase::new(CollectorKind::Docker, config),
            store,
        }
    }

    pub fn collect_metrics(&self, ctx: &CollectionContext) -> Vec<DockerMetrics> {
        self.base
            .gather(ctx, &self.store, |id, record| self.transform(id, record))
    }

    fn transform(&self, id: &str, record: DockerOperationRecord) -> Result<DockerMetrics> {
        let (start_time, end_time, duration_ms) =
            completed_span(id, record.start_time, record.end_time)?;
        let outcome = record.outcome.unwrap_or_else(DockerOutcome::success);

        Ok(DockerMetrics {
            operation_id: crate::sanitize::scrub_text(id),
            operation: record.operation,
            image: record.image,
            tool: record.tool,
            start_time,
            end_time,
            duration_ms,
            success: outcome.success,
            exit_code: outcome.exit_code,
            error: outcome.error.as_deref().map(crate::sanitize::scrub_text),
            metadata: self.base.sanitizer().sanitize(&outcome.metadata),
        })
    }
}

impl MetricsCollector for DockerCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Docker
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn collect(&self, ctx: &CollectionContext) -> Result<CollectedMetrics> {
        Ok(CollectedMetrics::Docker(self.collect_metrics(ctx)))
    }
}

//! Remote API request collector
//!
//! Tracks requests made against the hosting platform's REST and GraphQL
//! APIs, including the rate-limit headers observed on each response.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::context::CollectionContext;
use crate::error::Result;
use crate::types::{ApiMetrics, ApiOperation};

use super::store::{completed_span, operation_id, OperationRecord, OperationStore};
use super::{CollectedMetrics, CollectorBase, CollectorKind, MetricsCollector};

/// Raw API request as written by instrumentation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiOperationRecord {
    pub operation: ApiOperation,
    pub endpoint: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Option<ApiOutcome>,
}

impl OperationRecord for ApiOperationRecord {
    fn started_at(&self) -> DateTime<Utc> {
        self.start_time
    }
}

/// Response details of an API request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub rate_limit_limit: Option<u32>,
    pub rate_limit_remaining: Option<u32>,
    pub rate_limit_reset: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl ApiOutcome {
    /// Outcome derived from an HTTP status; 2xx and 3xx count as success.
    pub fn status(status_code: u16) -> Self {
        Self {
            success: (200..400).contains(&status_code),
            status_code: Some(status_code),
            ..Self::default()
        }
    }

    /// A request that never produced a response.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Attach the `x-ratelimit-*` values seen on the response.
    pub fn with_rate_limit(
        mut self,
        limit: u32,
        remaining: u32,
        reset: Option<DateTime<Utc>>,
    ) -> Self {
        self.rate_limit_limit = Some(limit);
        self.rate_limit_remaining = Some(remaining);
        self.rate_limit_reset = reset;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl OperationStore<ApiOperationRecord> {
    pub fn record_start(&self, id: &str, operation: ApiOperation, endpoint: &str) {
        self.insert(
            id,
            ApiOperationRecord {
                operation,
                endpoint: endpoint.to_string(),
                start_time: Utc::now(),
                end_time: None,
                outcome: None,
            },
        );
    }

    /// Without a matching start the request is recorded with zero duration.
    pub fn record_end(
        &self,
        id: &str,
        operation: ApiOperation,
        endpoint: &str,
        outcome: ApiOutcome,
    ) {
        let now = Utc::now();
        self.upsert_with(
            id,
            || ApiOperationRecord {
                operation,
                endpoint: endpoint.to_string(),
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

    pub fn record(
        &self,
        id: &str,
        operation: ApiOperation,
        endpoint: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        outcome: ApiOutcome,
    ) {
        self.insert(
            id,
            ApiOperationRecord {
                operation,
                endpoint: endpoint.to_string(),
                start_time,
                end_time: Some(end_time),
                outcome: Some(outcome),
            },
        );
    }

    /// Record a finished request; returns the generated operation id.
    pub fn record_request(
        &self,
        operation: ApiOperation,
        endpoint: &str,
        outcome: ApiOutcome,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> String {
        let id = operation_id(operation.as_str(), &strip_query(endpoint));
        self.record(&id, operation, endpoint, start_time, end_time, outcome);
        id
    }
}

/// Collector for remote API requests.
pub struct ApiCollector {
    base: CollectorBase,
    store: Arc<OperationStore<ApiOperationRecord>>,
}

impl ApiCollector {
    pub fn new(
        config: Arc<AnalyticsConfig>,
        store: Arc<OperationStore<ApiOperationRecord>>,
    ) -> Self {
        Self {
            base: CollectorBase::new(CollectorKind::Api, config),
            store,
        }
    }

    pub fn collect_metrics(&self, ctx: &CollectionContext) -> Vec<ApiMetrics> {
        self.base
            .gather(ctx, &self.store, |id, record| self.transform(id, record))
    }

    fn transform(&self, id: &str, record: ApiOperationRecord) -> Result<ApiMetrics> {
        let (start_time, end_time, duration_ms) =
            completed_span(id, record.start_time, record.end_time)?;
        let outcome = record.outcome.unwrap_or_default();

        if outcome.rate_limit_remaining == Some(0) {
            tracing::debug!(endpoint = %record.endpoint, "API rate limit exhausted");
        }

        Ok(ApiMetrics {
            operation_id: crate::sanitize::scrub_text(id),
            operation: record.operation,
            endpoint: strip_query(&record.endpoint),
            start_time,
            end_time,
            duration_ms,
            success: outcome.success,
            status_code: outcome.status_code,
            rate_limit_limit: outcome.rate_limit_limit,
            rate_limit_remaining: outcome.rate_limit_remaining,
            rate_limit_reset: outcome.rate_limit_reset,
            retry_count: outcome.retry_count,
            error: outcome.error.as_deref().map(crate::sanitize::scrub_text),
            metadata: self.base.sanitizer().sanitize(&outcome.metadata),
        })
    }
}

/// Query strings may carry tokens; only the path is reported.
fn strip_query(endpoint: &str) -> String {
    endpoint
        .split_once('?')
        .map_or(endpoint, |(path, _)| path)
        .to_string()
}

impl MetricsCollector for ApiCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Api
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn collect(&self, ctx: &CollectionContext) -> Result<CollectedMetrics> {
        Ok(CollectedMetrics::Api(self.collect_metrics(ctx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::test_support::{config, context};
    use chrono::Duration;

    #[test]
    fn test_status_drives_success() {
        assert!(ApiOutcome::status(200).success);
        assert!(ApiOutcome::status(304).success);
        assert!(!ApiOutcome::status(403).success);
        assert!(!ApiOutcome::status(502).success);
    }

    #[test]
    fn test_collect_reports_rate_limits() {
        let config = config(&[]);
        let store = Arc::new(OperationStore::<ApiOperationRecord>::new());
        let start = Utc::now() - Duration::seconds(1);
        let reset = start + Duration::minutes(10);
        store.record_request(
            ApiOperation::Get,
            "/repos/octo/widgets/pulls?access_token=SECRETVALUE",
            ApiOutcome::status(403)
                .with_rate_limit(5000, 0, Some(reset))
                .with_retries(2)
                .with_error("API rate limit exceeded"),
            start,
            start + Duration::milliseconds(80),
        );

        let collector = ApiCollector::new(Arc::clone(&config), store);
        let metrics = collector.collect_metrics(&context(config));

        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];
        assert_eq!(m.endpoint, "/repos/octo/widgets/pulls");
        assert_eq!(m.status_code, Some(403));
        assert_eq!(m.rate_limit_limit, Some(5000));
        assert_eq!(m.rate_limit_remaining, Some(0));
        assert_eq!(m.rate_limit_reset, Some(reset));
        assert_eq!(m.retry_count, 2);
        assert_eq!(m.duration_ms, 80);
        assert!(!m.success);
        assert!(m.operation_id.starts_with("get-/repos/octo/widgets/pulls-"));
        let json = serde_json::to_string(m).unwrap();
        assert!(!json.contains("SECRETVALUE"), "{json}");
    }

    #[test]
    fn test_caller_supplied_id_is_scrubbed() {
        let config = config(&[]);
        let store = Arc::new(OperationStore::<ApiOperationRecord>::new());
        let id = "get-/user?token=SECRETVALUE";
        store.record_start(id, ApiOperation::Get, "/user?token=SECRETVALUE");
        store.record_end(id, ApiOperation::Get, "/user", ApiOutcome::status(200));

        let collector = ApiCollector::new(Arc::clone(&config), store);
        let metrics = collector.collect_metrics(&context(config));

        assert_eq!(metrics.len(), 1);
        assert!(!metrics[0].operation_id.contains("SECRETVALUE"));
        assert_eq!(metrics[0].endpoint, "/user");
    }

    #[test]
    fn test_error_message_is_scrubbed() {
        let config = config(&[]);
        let store = Arc::new(OperationStore::<ApiOperationRecord>::new());
        store.record_start("q-1", ApiOperation::Graphql, "/graphql");
        store.record_end(
            "q-1",
            ApiOperation::Graphql,
            "/graphql",
            ApiOutcome::failure("request with Bearer abcdefghijklmnop failed"),
        );

        let collector = ApiCollector::new(Arc::clone(&config), store);
        let metrics = collector.collect_metrics(&context(config));
        let error = metrics[0].error.as_deref().unwrap();
        assert!(!error.contains("abcdefghijklmnop"), "{error}");
    }

    #[test]
    fn test_disabled_globally() {
        let config = config(&[("enabled", "false")]);
        let store = Arc::new(OperationStore::<ApiOperationRecord>::new());
        let now = Utc::now();
        store.record_request(ApiOperation::Post, "/x", ApiOutcome::status(201), now, now);

        let collector = ApiCollector::new(Arc::clone(&config), Arc::clone(&store));
        assert!(collector.collect_metrics(&context(config)).is_empty());
        assert_eq!(store.len(), 1);
    }
}

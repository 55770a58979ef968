//! Rolling raw events up into one aggregate.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::{
    ensure_schema_version, AggregatedAnalytics, AnalyticsEvent, CacheOperation, FailureCounts,
    SCHEMA_VERSION,
};

/// Mean of `values`, 0 when empty.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Build one aggregate over `events` for the given period.
///
/// - `repositoryCount` counts distinct repositories
/// - `cacheHitRate` is hits over restores that reported a hit flag
/// - duration averages are over individual operations, in milliseconds
/// - every event must carry the current schema version
pub fn aggregate_events(
    events: &[AnalyticsEvent],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<AggregatedAnalytics> {
    if events.is_empty() {
        return Err(Error::Aggregation("no events to aggregate".to_string()));
    }
    if period_end < period_start {
        return Err(Error::Aggregation(format!(
            "period ends ({period_end}) before it starts ({period_start})"
        )));
    }
    for event in events {
        ensure_schema_version(&event.schema_version)?;
    }

    let repositories: HashSet<&str> = events
        .iter()
        .map(|e| e.repository.full_name.as_str())
        .collect();

    let restores: Vec<bool> = events
        .iter()
        .flat_map(|e| &e.cache_metrics)
        .filter(|m| m.operation == CacheOperation::Restore)
        .filter_map(|m| m.hit)
        .collect();
    let cache_hit_rate = if restores.is_empty() {
        0.0
    } else {
        restores.iter().filter(|hit| **hit).count() as f64 / restores.len() as f64
    };

    let mut failures_by_category = FailureCounts::default();
    for failure in events.iter().flat_map(|e| &e.failure_metrics) {
        failures_by_category.add(failure.category, 1);
    }

    let successes = events.iter().filter(|e| e.action_metrics.success).count();

    let aggregate = AggregatedAnalytics {
        period_start,
        period_end,
        event_count: events.len() as u64,
        repository_count: repositories.len() as u64,
        cache_hit_rate,
        avg_cache_duration: mean(
            events
                .iter()
                .flat_map(|e| &e.cache_metrics)
                .map(|m| m.duration_ms as f64),
        ),
        avg_docker_duration: mean(
            events
                .iter()
                .flat_map(|e| &e.docker_metrics)
                .map(|m| m.duration_ms as f64),
        ),
        avg_api_duration: mean(
            events
                .iter()
                .flat_map(|e| &e.api_metrics)
                .map(|m| m.duration_ms as f64),
        ),
        failures_by_category,
        avg_action_duration: mean(events.iter().map(|e| e.action_metrics.duration_ms as f64)),
        action_success_rate: successes as f64 / events.len() as f64,
        schema_version: SCHEMA_VERSION.to_string(),
    };

    tracing::debug!(
        events = aggregate.event_count,
        repositories = aggregate.repository_count,
        "Aggregated events"
    );

    Ok(aggregate)
}

//! Merging aggregates across periods and repositories.

use crate::error::{Error, Result};
use crate::types::{ensure_schema_version, AggregatedAnalytics, FailureCounts};

use super::aggregate::mean;

/// Weighted mean of `(value, weight)` pairs. Falls back to the plain mean
/// when every weight is zero.
fn weighted_mean(pairs: &[(f64, u64)]) -> f64 {
    let total: u64 = pairs.iter().map(|(_, w)| w).sum();
    if total == 0 {
        return mean(pairs.iter().map(|(v, _)| *v));
    }
    pairs.iter().map(|(v, w)| v * *w as f64).sum::<f64>() / total as f64
}

/// Mean of `field` over `aggregates`, weighted by event count.
fn weighted(
    aggregates: &[AggregatedAnalytics],
    field: impl Fn(&AggregatedAnalytics) -> f64,
) -> f64 {
    let pairs: Vec<(f64, u64)> = aggregates
        .iter()
        .map(|a| (field(a), a.event_count))
        .collect();
    weighted_mean(&pairs)
}

/// Merge aggregates into one.
///
/// Counts (`eventCount`, `repositoryCount`, failures by category) are
/// summed. Rates and averages are weighted by `eventCount`. The period
/// spans the earliest start and latest end. All inputs must share the
/// current schema version.
///
/// `repositoryCount` is a plain sum, so a repository present in several
/// inputs is counted once per input.
pub fn merge_aggregated_analytics(
    aggregates: &[AggregatedAnalytics],
) -> Result<AggregatedAnalytics> {
    let first = aggregates
        .first()
        .ok_or_else(|| Error::Aggregation("no aggregates to merge".to_string()))?;

    for aggregate in aggregates {
        if aggregate.schema_version != first.schema_version {
            return Err(Error::SchemaVersion {
                expected: first.schema_version.clone(),
                found: aggregate.schema_version.clone(),
            });
        }
    }
    ensure_schema_version(&first.schema_version)?;

    let mut failures_by_category = FailureCounts::default();
    for aggregate in aggregates {
        failures_by_category.merge(&aggregate.failures_by_category);
    }

    let merged = AggregatedAnalytics {
        period_start: aggregates
            .iter()
            .map(|a| a.period_start)
            .min()
            .unwrap_or(first.period_start),
        period_end: aggregates
            .iter()
            .map(|a| a.period_end)
            .max()
            .unwrap_or(first.period_end),
        event_count: aggregates.iter().map(|a| a.event_count).sum(),
        repository_count: aggregates.iter().map(|a| a.repository_count).sum(),
        cache_hit_rate: weighted(aggregates, |a| a.cache_hit_rate),
        avg_cache_duration: weighted(aggregates, |a| a.avg_cache_duration),
        avg_docker_duration: weighted(aggregates, |a| a.avg_docker_duration),
        avg_api_duration: weighted(aggregates, |a| a.avg_api_duration),
        failures_by_category,
        avg_action_duration: weighted(aggregates, |a| a.avg_action_duration),
        action_success_rate: weighted(aggregates, |a| a.action_success_rate),
        schema_version: first.schema_version.clone(),
    };

    tracing::debug!(
        inputs = aggregates.len(),
        events = merged.event_count,
        "Merged aggregates"
    );

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureCategory, SCHEMA_VERSION};
    use chrono::{Duration, TimeZone, Utc};

    fn aggregate(event_count: u64, hit_rate: f64, day: u32) -> AggregatedAnalytics {
        let start = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        let mut failures = FailureCounts::default();
        failures.add(FailureCategory::Network, event_count);
        AggregatedAnalytics {
            period_start: start,
            period_end: start + Duration::days(1),
            event_count,
            repository_count: 1,
            cache_hit_rate: hit_rate,
            avg_cache_duration: 100.0 * day as f64,
            avg_docker_duration: 0.0,
            avg_api_duration: 50.0,
            failures_by_category: failures,
            avg_action_duration: 1000.0,
            action_success_rate: 1.0,
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }

    #[test]
    fn test_merge_sums_counts_and_weights_rates() {
        let merged =
            merge_aggregated_analytics(&[aggregate(5, 0.8, 1), aggregate(3, 0.4, 2)]).unwrap();

        assert_eq!(merged.event_count, 8);
        assert_eq!(merged.repository_count, 2);
        assert!((merged.cache_hit_rate - (5.0 * 0.8 + 3.0 * 0.4) / 8.0).abs() < 1e-9);
        assert!((merged.avg_cache_duration - (5.0 * 100.0 + 3.0 * 200.0) / 8.0).abs() < 1e-9);
        assert_eq!(merged.avg_api_duration, 50.0);
        assert_eq!(merged.failures_by_category.network, 8);
        assert_eq!(
            merged.period_start,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            merged.period_end,
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_zero_weights_fall_back_to_plain_mean() {
        let merged =
            merge_aggregated_analytics(&[aggregate(0, 1.0, 1), aggregate(0, 0.0, 2)]).unwrap();
        assert_eq!(merged.event_count, 0);
        assert!((merged.cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_single_input_is_identity() {
        let input = aggregate(4, 0.25, 5);
        let merged = merge_aggregated_analytics(std::slice::from_ref(&input)).unwrap();
        assert_eq!(merged, input);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(
            merge_aggregated_analytics(&[]),
            Err(Error::Aggregation(_))
        ));
    }

    #[test]
    fn test_schema_mismatch_is_an_error() {
        let mut other = aggregate(1, 0.5, 2);
        other.schema_version = "2.0.0".to_string();
        let err = merge_aggregated_analytics(&[aggregate(1, 0.5, 1), other]).unwrap_err();
        assert!(matches!(err, Error::SchemaVersion { .. }));
    }
}

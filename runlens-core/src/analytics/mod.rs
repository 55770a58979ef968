//! Cross-run analytics
//!
//! Raw [`AnalyticsEvent`](crate::types::AnalyticsEvent)s are rolled up with
//! [`aggregate_events`]; aggregates from different periods or repositories
//! are combined with [`merge_aggregated_analytics`].

mod aggregate;
mod merge;

pub use aggregate::aggregate_events;
pub use merge::merge_aggregated_analytics;

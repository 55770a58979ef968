//! Per-run operation stores
//!
//! Instrumentation sites write raw operation records into an
//! [`OperationStore`] while the run is in progress; collectors drain it at
//! collection time. One [`OperationStores`] is built per run and shared by
//! `Arc` with every call site, so there is no hidden global state.
//!
//! Writes are keyed by a caller-unique operation id. The last write for an id
//! wins and ids never contend with each other, so unrelated call sites can
//! record concurrently without coordinating.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::api::ApiOperationRecord;
use super::cache::CacheOperationRecord;
use super::docker::DockerOperationRecord;
use super::failure::FailureRecord;

/// A raw record held in an operation store.
pub trait OperationRecord: Send + Sync + 'static {
    /// When the operation began; used to order drained records.
    fn started_at(&self) -> DateTime<Utc>;
}

/// Concurrent, id-keyed, append-only store of raw operation records.
pub struct OperationStore<R> {
    records: DashMap<String, R>,
}

impl<R: OperationRecord> OperationStore<R> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Store `record` under `id`, replacing any earlier write for that id.
    pub fn insert(&self, id: impl Into<String>, record: R) {
        self.records.insert(id.into(), record);
    }

    /// Mutate the record for `id`, creating it with `init` if absent.
    pub fn upsert_with(&self, id: &str, init: impl FnOnce() -> R, update: impl FnOnce(&mut R)) {
        let mut entry = self.records.entry(id.to_string()).or_insert_with(init);
        update(entry.value_mut());
    }

    /// Snapshot of the record for `id`.
    pub fn get(&self, id: &str) -> Option<R>
    where
        R: Clone,
    {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Remove and return every record, ordered by start time then id.
    ///
    /// Records written while the drain is in progress may be left for the
    /// next drain.
    pub fn drain(&self) -> Vec<(String, R)> {
        let ids: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        let mut drained: Vec<(String, R)> = ids
            .into_iter()
            .filter_map(|id| self.records.remove(&id))
            .collect();
        drained.sort_by(|(a_id, a), (b_id, b)| {
            a.started_at()
                .cmp(&b.started_at())
                .then_with(|| a_id.cmp(b_id))
        });
        drained
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

impl<R: OperationRecord> Default for OperationStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// The four operation stores of one run.
#[derive(Clone, Default)]
pub struct OperationStores {
    pub cache: Arc<OperationStore<CacheOperationRecord>>,
    pub docker: Arc<OperationStore<DockerOperationRecord>>,
    pub api: Arc<OperationStore<ApiOperationRecord>>,
    pub failures: Arc<OperationStore<FailureRecord>>,
}

impl OperationStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every pending record. Call between runs in long-lived processes.
    pub fn clear(&self) {
        self.cache.clear();
        self.docker.clear();
        self.api.clear();
        self.failures.clear();
    }

    /// Total pending records across all stores.
    pub fn pending(&self) -> usize {
        self.cache.len() + self.docker.len() + self.api.len() + self.failures.len()
    }
}

/// Build an operation id of the form `{kind}-{key}-{millis}`.
pub fn operation_id(kind: &str, key: &str) -> String {
    format!("{}-{}-{}", kind, key, Utc::now().timestamp_millis())
}

/// Resolve the span of a finished operation.
///
/// Fails when the operation never completed or its clock went backwards.
pub(crate) fn completed_span(
    id: &str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Result<(DateTime<Utc>, DateTime<Utc>, u64)> {
    let end = end.ok_or_else(|| Error::Collector(format!("operation {id} never completed")))?;
    let elapsed = (end - start).num_milliseconds();
    if elapsed < 0 {
        return Err(Error::Collector(format!(
            "operation {id} ended before it started ({elapsed}ms)"
        )));
    }
    Ok((start, end, elapsed as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct TestRecord {
        at: DateTime<Utc>,
        value: u32,
    }

    impl OperationRecord for TestRecord {
        fn started_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn test_last_write_wins_per_id() {
        let store = OperationStore::<TestRecord>::new();
        let now = Utc::now();
        store.insert("a", TestRecord { at: now, value: 1 });
        store.insert("a", TestRecord { at: now, value: 2 });
        store.insert("b", TestRecord { at: now, value: 3 });

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().value, 2);
    }

    #[test]
    fn test_drain_orders_by_start_and_empties() {
        let store = OperationStore::<TestRecord>::new();
        let now = Utc::now();
        store.insert("late", TestRecord { at: now, value: 2 });
        store.insert(
            "early",
            TestRecord {
                at: now - Duration::seconds(5),
                value: 1,
            },
        );

        let drained = store.drain();
        assert_eq!(drained[0].0, "early");
        assert_eq!(drained[1].0, "late");
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_writers_with_unique_ids() {
        let store = Arc::new(OperationStore::<TestRecord>::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.insert(
                            format!("t{t}-{i}"),
                            TestRecord {
                                at: Utc::now(),
                                value: i,
                            },
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 800);
    }

    #[test]
    fn test_completed_span() {
        let start = Utc::now();
        let end = start + Duration::milliseconds(250);
        assert_eq!(completed_span("x", start, Some(end)).unwrap().2, 250);
        assert!(completed_span("x", start, None).is_err());
        assert!(completed_span("x", end, Some(start)).is_err());
    }

    #[test]
    fn test_operation_id_shape() {
        let id = operation_id("restore", "deps-linux");
        assert!(id.starts_with("restore-deps-linux-"));
    }
}

//! Datagate Store
//!
//! Append-only history of run metrics and accepted batches. Baselines are
//! aggregated at read time; nothing is ever updated in place.

pub mod jsonl;
pub mod memory;
pub mod record;

pub use jsonl::JsonlBaselineStore;
pub use memory::InMemoryBaselineStore;
pub use record::{Baseline, Bucket, HistoryQuery, MetricRecord, ProcessedBatch};

/// Errors that can occur when reading or appending history
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Non-finite value {value} for metric '{metric}'")]
    NonFinite { metric: String, value: f64 },
}

/// Trait for baseline stores
///
/// Implementations must allow concurrent appends and snapshot reads from
/// independent pipeline instances.
pub trait BaselineStore: Send + Sync {
    /// Append metric records of one run
    fn append_metrics(&self, records: &[MetricRecord]) -> Result<(), StoreError>;

    /// Records matching a query, oldest first
    fn query(&self, query: &HistoryQuery) -> Result<Vec<MetricRecord>, StoreError>;

    /// Record an accepted batch
    fn append_processed(&self, batch: ProcessedBatch) -> Result<(), StoreError>;

    /// Content hashes of the `n` most recently accepted batches of a dataset
    fn recent_hashes(&self, dataset_id: &str, n: usize) -> Result<Vec<String>, StoreError>;

    /// Baseline over the records matching a query
    fn baseline(&self, query: &HistoryQuery) -> Result<Option<Baseline>, StoreError> {
        Ok(Baseline::from_records(&self.query(query)?))
    }
}

/// Reject records a JSON log could not read back
pub(crate) fn check_finite(records: &[MetricRecord]) -> Result<(), StoreError> {
    match records.iter().find(|r| !r.value.is_finite()) {
        Some(bad) => Err(StoreError::NonFinite {
            metric: bad.metric_name.clone(),
            value: bad.value,
        }),
        None => Ok(()),
    }
}

/// Most recent `n` hashes of a dataset from a processed-batch log
pub(crate) fn latest_hashes<'a, I>(log: I, dataset_id: &str, n: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a ProcessedBatch>,
{
    let mut entries: Vec<&ProcessedBatch> = log
        .into_iter()
        .filter(|b| b.dataset_id == dataset_id)
        .collect();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
        .into_iter()
        .take(n)
        .map(|b| b.content_hash.clone())
        .collect()
}

//! In-memory baseline store
//!
//! Useful for tests and for single-process runs that do not need history to
//! survive a restart.

use std::sync::{Arc, RwLock};

use crate::record::{HistoryQuery, MetricRecord, ProcessedBatch};
use crate::{check_finite, latest_hashes, BaselineStore, StoreError};

/// Baseline store backed by `RwLock`-guarded vectors
#[derive(Debug, Clone, Default)]
pub struct InMemoryBaselineStore {
    metrics: Arc<RwLock<Vec<MetricRecord>>>,
    processed: Arc<RwLock<Vec<ProcessedBatch>>>,
}

impl InMemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of metric records held
    pub fn metric_count(&self) -> usize {
        self.metrics.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Number of processed-batch entries held
    pub fn processed_count(&self) -> usize {
        self.processed.read().map(|p| p.len()).unwrap_or(0)
    }
}

impl BaselineStore for InMemoryBaselineStore {
    fn append_metrics(&self, records: &[MetricRecord]) -> Result<(), StoreError> {
        check_finite(records)?;
        let mut metrics = self.metrics.write().map_err(|_| StoreError::Poisoned)?;
        metrics.extend_from_slice(records);
        Ok(())
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<MetricRecord>, StoreError> {
        let metrics = self.metrics.read().map_err(|_| StoreError::Poisoned)?;
        Ok(query.select(metrics.iter()))
    }

    fn append_processed(&self, batch: ProcessedBatch) -> Result<(), StoreError> {
        let mut processed = self.processed.write().map_err(|_| StoreError::Poisoned)?;
        processed.push(batch);
        Ok(())
    }

    fn recent_hashes(&self, dataset_id: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let processed = self.processed.read().map_err(|_| StoreError::Poisoned)?;
        Ok(latest_hashes(processed.iter(), dataset_id, n))
    }
}

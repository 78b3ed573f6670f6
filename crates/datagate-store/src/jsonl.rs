//! File-backed baseline store
//!
//! Two append-only JSON-lines logs in one directory:
//! `metrics.jsonl` holds metric records and `processed.jsonl` holds accepted
//! batches. Each read takes a snapshot of the log; lines that no longer
//! parse are skipped with a warning.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::record::{HistoryQuery, MetricRecord, ProcessedBatch};
use crate::{check_finite, latest_hashes, BaselineStore, StoreError};

const METRICS_FILE: &str = "metrics.jsonl";
const PROCESSED_FILE: &str = "processed.jsonl";

/// Baseline store persisted as JSON-lines files
#[derive(Debug)]
pub struct JsonlBaselineStore {
    dir: PathBuf,

    /// Serializes appends within this process
    write_lock: Mutex<()>,
}

impl JsonlBaselineStore {
    /// Open (and create if needed) a store directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append<T: Serialize>(&self, file: &str, items: &[T]) -> Result<(), StoreError> {
        let mut buffer = String::new();
        for item in items {
            let line =
                serde_json::to_string(item).map_err(|e| StoreError::Serialize(e.to_string()))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .map_err(|e| StoreError::Io(e.to_string()))?;
        handle
            .write_all(buffer.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        handle.flush().map_err(|e| StoreError::Io(e.to_string()))
    }

    fn read_all<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StoreError> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let handle = fs::File::open(&path).map_err(|e| StoreError::Io(e.to_string()))?;
        let mut items = Vec::new();
        for (idx, line) in BufReader::new(handle).lines().enumerate() {
            let line = line.map_err(|e| StoreError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(
                    file = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping unreadable history line"
                ),
            }
        }
        Ok(items)
    }
}

impl BaselineStore for JsonlBaselineStore {
    fn append_metrics(&self, records: &[MetricRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        check_finite(records)?;
        tracing::debug!(count = records.len(), dir = %self.dir.display(), "appending metric records");
        self.append(METRICS_FILE, records)
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<MetricRecord>, StoreError> {
        let records: Vec<MetricRecord> = self.read_all(METRICS_FILE)?;
        Ok(query.select(records.iter()))
    }

    fn append_processed(&self, batch: ProcessedBatch) -> Result<(), StoreError> {
        self.append(PROCESSED_FILE, std::slice::from_ref(&batch))
    }

    fn recent_hashes(&self, dataset_id: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let log: Vec<ProcessedBatch> = self.read_all(PROCESSED_FILE)?;
        Ok(latest_hashes(log.iter(), dataset_id, n))
    }
}

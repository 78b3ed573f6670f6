//! Batch sources: file metadata and row reading
//!
//! Sources only read. Column naming, null handling and typing happen in the
//! load stage.

use chrono::{DateTime, Utc};
use datagate_core::{RawTable, RowSampler};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// What a source knows about a batch before reading rows
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub size_bytes: u64,

    /// Last modification time, when the source can tell
    pub modified: Option<DateTime<Utc>>,

    /// SHA-256 of the raw content
    pub content_hash: String,
}

/// Errors that can occur when reading a batch
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Batch not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported batch format: {0}")]
    UnsupportedFormat(String),
}

/// Supported batch formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    Csv,

    /// One JSON object per line; `.json` files may also hold one array
    JsonLines,
}

impl BatchFormat {
    /// Detect the format from the reference's extension
    pub fn detect(batch_ref: &str) -> Result<Self, SourceError> {
        let ext = Path::new(batch_ref)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "jsonl" | "ndjson" | "json" => Ok(Self::JsonLines),
            _ => Err(SourceError::UnsupportedFormat(batch_ref.to_string())),
        }
    }
}

/// Trait for batch sources
pub trait BatchSource: Send + Sync {
    /// Size, modification time and content hash of a batch
    fn describe(&self, batch_ref: &str) -> Result<SourceMetadata, SourceError>;

    /// Read rows, keeping those the sampler selects
    fn load(&self, batch_ref: &str, sampler: &mut RowSampler) -> Result<RawTable, SourceError>;
}

/// Reads batches from the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FileBatchSource;

impl FileBatchSource {
    pub fn new() -> Self {
        Self
    }

    fn open(batch_ref: &str) -> Result<std::fs::File, SourceError> {
        std::fs::File::open(batch_ref).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(batch_ref.to_string()),
            _ => SourceError::Io(format!("{}: {}", batch_ref, e)),
        })
    }
}

impl BatchSource for FileBatchSource {
    fn describe(&self, batch_ref: &str) -> Result<SourceMetadata, SourceError> {
        let file = Self::open(batch_ref)?;
        let metadata = file.metadata().map_err(|e| SourceError::Io(e.to_string()))?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        let mut hasher = Sha256::new();
        let mut reader = BufReader::new(file);
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|e| SourceError::Io(e.to_string()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(SourceMetadata {
            size_bytes: metadata.len(),
            modified,
            content_hash: hex::encode(hasher.finalize()),
        })
    }

    fn load(&self, batch_ref: &str, sampler: &mut RowSampler) -> Result<RawTable, SourceError> {
        let format = BatchFormat::detect(batch_ref)?;
        let reader = BufReader::new(Self::open(batch_ref)?);
        read_table(format, reader, sampler)
    }
}

#[derive(Debug, Clone)]
struct InMemoryBatch {
    content: String,
    modified: Option<DateTime<Utc>>,
}

/// Batches held in memory, keyed by reference
///
/// The reference's extension selects the format, as for files.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBatchSource {
    batches: Arc<RwLock<HashMap<String, InMemoryBatch>>>,
}

impl InMemoryBatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a batch
    pub fn insert(
        &self,
        batch_ref: impl Into<String>,
        content: impl Into<String>,
        modified: Option<DateTime<Utc>>,
    ) {
        if let Ok(mut batches) = self.batches.write() {
            batches.insert(
                batch_ref.into(),
                InMemoryBatch {
                    content: content.into(),
                    modified,
                },
            );
        }
    }

    fn get(&self, batch_ref: &str) -> Result<InMemoryBatch, SourceError> {
        self.batches
            .read()
            .map_err(|_| SourceError::Io("batch source lock poisoned".to_string()))?
            .get(batch_ref)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(batch_ref.to_string()))
    }
}

impl BatchSource for InMemoryBatchSource {
    fn describe(&self, batch_ref: &str) -> Result<SourceMetadata, SourceError> {
        let batch = self.get(batch_ref)?;
        Ok(SourceMetadata {
            size_bytes: batch.content.len() as u64,
            modified: batch.modified,
            content_hash: datagate_core::content_hash(batch.content.as_bytes()),
        })
    }

    fn load(&self, batch_ref: &str, sampler: &mut RowSampler) -> Result<RawTable, SourceError> {
        let format = BatchFormat::detect(batch_ref)?;
        let batch = self.get(batch_ref)?;
        read_table(format, batch.content.as_bytes(), sampler)
    }
}

/// Read a table in the given format
pub fn read_table<R: Read>(
    format: BatchFormat,
    reader: R,
    sampler: &mut RowSampler,
) -> Result<RawTable, SourceError> {
    match format {
        BatchFormat::Csv => read_csv(reader, sampler),
        BatchFormat::JsonLines => read_json(BufReader::new(reader), sampler),
    }
}

fn read_csv<R: Read>(reader: R, sampler: &mut RowSampler) -> Result<RawTable, SourceError> {
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| SourceError::Parse(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut table = RawTable {
        headers,
        ..RawTable::default()
    };

    for record in csv_reader.records() {
        let record = record.map_err(|e| SourceError::Parse(e.to_string()))?;
        table.rows_seen += 1;
        if sampler.keep() {
            table.rows.push(record.iter().map(|cell| Some(cell.to_string())).collect());
        }
    }

    Ok(table)
}

fn read_json<R: BufRead>(mut reader: R, sampler: &mut RowSampler) -> Result<RawTable, SourceError> {
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|e| SourceError::Io(e.to_string()))?;

    let objects: Vec<serde_json::Map<String, serde_json::Value>> =
        if content.trim_start().starts_with('[') {
            serde_json::from_str(&content).map_err(|e| SourceError::Parse(e.to_string()))?
        } else {
            content
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(idx, line)| {
                    serde_json::from_str(line)
                        .map_err(|e| SourceError::Parse(format!("line {}: {}", idx + 1, e)))
                })
                .collect::<Result<_, _>>()?
        };

    // Headers are the union of keys, in first-seen order
    let mut headers: Vec<String> = Vec::new();
    let mut kept = Vec::new();
    let mut table = RawTable::default();

    for object in objects {
        for key in object.keys() {
            if !headers.iter().any(|h| h == key) {
                headers.push(key.clone());
            }
        }
        table.rows_seen += 1;
        if sampler.keep() {
            kept.push(object);
        }
    }

    table.rows = kept
        .into_iter()
        .map(|object| {
            headers
                .iter()
                .map(|h| match object.get(h) {
                    None | Some(serde_json::Value::Null) => None,
                    Some(serde_json::Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                })
                .collect()
        })
        .collect();
    table.headers = headers;

    Ok(table)
}

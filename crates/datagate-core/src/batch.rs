//! In-memory batch representation and deterministic row sampling

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::schema::{normalize_column_name, LogicalType};

/// A single typed cell
///
/// Dates and timestamps keep their source text; the column's logical type
/// records what they are.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Text form used for key comparisons, patterns and allowed values
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
        }
    }
}

/// One column of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchColumn {
    /// Normalized column name
    pub name: String,

    /// Detected logical type
    pub logical_type: LogicalType,

    pub values: Vec<Value>,
}

impl BatchColumn {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            logical_type,
            values,
        }
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    /// Null percentage in [0, 100]
    pub fn null_pct(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.null_count() as f64 / self.values.len() as f64 * 100.0
    }

    /// Non-null numeric values, in row order
    pub fn numeric_values(&self) -> Vec<f64> {
        self.values.iter().filter_map(Value::as_f64).collect()
    }

    /// Number of distinct non-null values
    pub fn distinct_count(&self) -> usize {
        self.values
            .iter()
            .filter_map(Value::render)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Batch construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error("Column '{column}' has {actual} values, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// In-memory tabular snapshot owned by one run
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<BatchColumn>,
    row_count: usize,

    /// Rows in the source before sampling
    source_rows: usize,

    /// Whether rows were sampled
    sampled: bool,
}

impl Batch {
    /// Build a batch from equally sized columns
    pub fn new(columns: Vec<BatchColumn>) -> Result<Self, BatchError> {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
        for column in &columns {
            if column.values.len() != row_count {
                return Err(BatchError::RaggedColumn {
                    column: column.name.clone(),
                    expected: row_count,
                    actual: column.values.len(),
                });
            }
        }

        Ok(Self {
            columns,
            row_count,
            source_rows: row_count,
            sampled: false,
        })
    }

    /// Mark this batch as a sample of a larger source
    pub fn with_sampling(mut self, source_rows: usize) -> Self {
        self.sampled = true;
        self.source_rows = source_rows;
        self
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Row count of the full source (equals `row_count` when not sampled)
    pub fn source_rows(&self) -> usize {
        self.source_rows
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn columns(&self) -> &[BatchColumn] {
        &self.columns
    }

    /// Find a column by name (normalized comparison)
    pub fn column(&self, name: &str) -> Option<&BatchColumn> {
        let wanted = normalize_column_name(name);
        self.columns.iter().find(|c| c.name == wanted)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Count rows identical to an earlier row across every column
    pub fn duplicate_rows(&self) -> usize {
        let mut seen = HashSet::new();
        (0..self.row_count)
            .filter(|&row| {
                let key: Vec<Option<String>> =
                    self.columns.iter().map(|c| c.values[row].render()).collect();
                !seen.insert(key)
            })
            .count()
    }
}

/// Untyped rows as read from a source, before normalization and typing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    /// Header names in source order
    pub headers: Vec<String>,

    /// Kept rows; `None` is a missing cell
    pub rows: Vec<Vec<Option<String>>>,

    /// Rows read from the source, including rows the sampler dropped
    pub rows_seen: usize,
}

/// Bernoulli row sampler with a reproducible seed
#[derive(Debug, Clone)]
pub struct RowSampler {
    rng: Option<StdRng>,
    rate: f64,
}

impl RowSampler {
    /// Keep every row
    pub fn full() -> Self {
        Self { rng: None, rate: 1.0 }
    }

    /// Keep each row with probability `rate`
    pub fn bernoulli(rate: f64, seed: u64) -> Self {
        Self {
            rng: Some(StdRng::seed_from_u64(seed)),
            rate: rate.clamp(0.0, 1.0),
        }
    }

    /// Seed from a run id, so re-runs of the same batch draw the same rows
    pub fn for_run(rate: f64, run_id: &str) -> Self {
        let digest = Sha256::digest(run_id.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        Self::bernoulli(rate, u64::from_le_bytes(seed))
    }

    pub fn is_sampling(&self) -> bool {
        self.rng.is_some()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Decide whether the next row is kept
    pub fn keep(&mut self) -> bool {
        match self.rng.as_mut() {
            Some(rng) => rng.gen_bool(self.rate),
            None => true,
        }
    }
}

/// SHA-256 hex digest of raw batch content
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Default run id: stable for a given dataset and batch content
pub fn derive_run_id(dataset_id: &str, content_hash: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", dataset_id, content_hash).as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> Batch {
        Batch::new(vec![
            BatchColumn::new(
                "id",
                LogicalType::Int,
                vec![Value::Int(1), Value::Int(2), Value::Int(1)],
            ),
            BatchColumn::new(
                "name",
                LogicalType::String,
                vec![
                    Value::Text("a".into()),
                    Value::Null,
                    Value::Text("a".into()),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn column_lookup_is_normalized() {
        let batch = sample_batch();
        assert!(batch.column(" ID ").is_some());
        assert!(batch.column("missing").is_none());
        assert_eq!(batch.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn column_statistics() {
        let batch = sample_batch();
        let name = batch.column("name").unwrap();
        assert_eq!(name.null_count(), 1);
        assert!((name.null_pct() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(batch.column("id").unwrap().distinct_count(), 2);
        assert_eq!(batch.duplicate_rows(), 1);
    }

    #[test]
    fn ragged_columns_rejected() {
        let result = Batch::new(vec![
            BatchColumn::new("a", LogicalType::Int, vec![Value::Int(1)]),
            BatchColumn::new("b", LogicalType::Int, vec![]),
        ]);
        assert!(matches!(result, Err(BatchError::RaggedColumn { .. })));
    }

    #[test]
    fn sampling_is_reproducible() {
        let draw = |run_id: &str| {
            let mut sampler = RowSampler::for_run(0.3, run_id);
            (0..200).map(|_| sampler.keep()).collect::<Vec<_>>()
        };

        assert_eq!(draw("run-a"), draw("run-a"));
        assert_ne!(draw("run-a"), draw("run-b"));

        let kept = draw("run-a").into_iter().filter(|k| *k).count();
        assert!(kept > 20 && kept < 120);
    }

    #[test]
    fn full_sampler_keeps_everything() {
        let mut sampler = RowSampler::full();
        assert!(!sampler.is_sampling());
        assert!((0..10).all(|_| sampler.keep()));
    }

    #[test]
    fn run_id_is_stable() {
        let hash = content_hash(b"a,b\n1,2\n");
        assert_eq!(hash.len(), 64);
        let id = derive_run_id("transactions", &hash);
        assert_eq!(id.len(), 16);
        assert_eq!(id, derive_run_id("transactions", &hash));
        assert_ne!(id, derive_run_id("users", &hash));
    }
}

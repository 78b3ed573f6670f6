//! Metric records, history queries and baselines

use chrono::{DateTime, Datelike, Duration, Utc};
use datagate_core::{BucketKind, Lookback};
use serde::{Deserialize, Serialize};

/// Seasonal partition key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// 0 = Monday .. 6 = Sunday
    DayOfWeek(u8),

    /// 1 = January .. 12 = December
    Month(u8),
}

impl Bucket {
    /// Bucket a timestamp falls into
    pub fn for_timestamp(kind: BucketKind, timestamp: DateTime<Utc>) -> Self {
        match kind {
            BucketKind::DayOfWeek => Bucket::DayOfWeek(timestamp.weekday().num_days_from_monday() as u8),
            BucketKind::Month => Bucket::Month(timestamp.month() as u8),
        }
    }

    /// Label used in reports, e.g. `day_of_week:5`
    pub fn label(&self) -> String {
        match self {
            Bucket::DayOfWeek(day) => format!("day_of_week:{}", day),
            Bucket::Month(month) => format!("month:{}", month),
        }
    }
}

/// One metric observation of one run. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub dataset_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub bucket: Bucket,
}

impl MetricRecord {
    pub fn new(
        dataset_id: impl Into<String>,
        run_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        metric_name: impl Into<String>,
        value: f64,
        bucket_kind: BucketKind,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            run_id: run_id.into(),
            timestamp,
            metric_name: metric_name.into(),
            value,
            bucket: Bucket::for_timestamp(bucket_kind, timestamp),
        }
    }
}

/// An accepted batch, used for duplicate detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedBatch {
    pub dataset_id: String,
    pub run_id: String,
    pub content_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Selects metric history for one dataset and metric
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub dataset_id: String,
    pub metric_name: String,

    /// Restrict to one seasonal bucket
    pub bucket: Option<Bucket>,
    pub lookback: Lookback,

    /// Leave out records of this run
    pub exclude_run: Option<String>,

    /// Records after this instant are ignored
    pub as_of: DateTime<Utc>,
}

impl HistoryQuery {
    pub fn new(
        dataset_id: impl Into<String>,
        metric_name: impl Into<String>,
        as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            metric_name: metric_name.into(),
            bucket: None,
            lookback: Lookback::default(),
            exclude_run: None,
            as_of,
        }
    }

    pub fn with_bucket(mut self, bucket: Bucket) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_lookback(mut self, lookback: Lookback) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn excluding_run(mut self, run_id: impl Into<String>) -> Self {
        self.exclude_run = Some(run_id.into());
        self
    }

    fn matches(&self, record: &MetricRecord) -> bool {
        if record.dataset_id != self.dataset_id || record.metric_name != self.metric_name {
            return false;
        }
        if record.timestamp > self.as_of {
            return false;
        }
        if let Some(bucket) = self.bucket {
            if record.bucket != bucket {
                return false;
            }
        }
        if let Some(run) = &self.exclude_run {
            if &record.run_id == run {
                return false;
            }
        }
        if let Lookback::Days(days) = self.lookback {
            if record.timestamp < self.as_of - Duration::days(i64::from(days)) {
                return false;
            }
        }
        true
    }

    /// Apply the query to a record log, returning matches oldest first
    pub fn select<'a, I>(&self, records: I) -> Vec<MetricRecord>
    where
        I: IntoIterator<Item = &'a MetricRecord>,
    {
        let mut selected: Vec<MetricRecord> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        if let Lookback::Runs(n) = self.lookback {
            let skip = selected.len().saturating_sub(n);
            selected.drain(..skip);
        }
        selected
    }
}

/// Aggregate computed on read over a history window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,

    /// Population standard deviation
    pub std: f64,
    pub sample_count: usize,
}

impl Baseline {
    /// `None` when there are no values
    pub fn compute(values: &[f64]) -> Option<Baseline> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Baseline {
            mean,
            std: variance.sqrt(),
            sample_count: values.len(),
        })
    }

    pub fn from_records(records: &[MetricRecord]) -> Option<Baseline> {
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        Self::compute(&values)
    }
}

//! Load stage: column normalization, type detection and batch construction

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use datagate_core::{
    normalize_column_name, Batch, BatchColumn, LogicalType, RawTable, RowSampler, StageError, Value,
};
use std::collections::HashSet;

use crate::outcome::StageOutcome;
use crate::source::BatchSource;

/// Cell values treated as null (compared trimmed, case-insensitively)
const NULL_TOKENS: [&str; 5] = ["", "null", "na", "nan", "none"];

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Load stage payload
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBatch {
    pub batch: Batch,
    pub rows_loaded: usize,
    pub columns: Vec<String>,
    pub sampled: bool,
}

impl LoadedBatch {
    pub fn summary(&self) -> String {
        format!(
            "rows_loaded={} columns={} sampled={}",
            self.rows_loaded,
            self.columns.len(),
            self.sampled
        )
    }
}

/// Read a batch through a source and type it
pub fn load(
    source: &dyn BatchSource,
    batch_ref: &str,
    sampler: &mut RowSampler,
) -> StageOutcome<LoadedBatch> {
    let raw = match source.load(batch_ref, sampler) {
        Ok(raw) => raw,
        Err(e) => return StageOutcome::Stop(None, StageError::input(e.to_string())),
    };

    match build_batch(raw, sampler.is_sampling()) {
        Ok(loaded) => StageOutcome::Continue(loaded),
        Err(e) => StageOutcome::Stop(None, e),
    }
}

/// Normalize headers, detect column types and build a batch
pub fn build_batch(raw: RawTable, sampled: bool) -> Result<LoadedBatch, StageError> {
    if raw.rows.is_empty() {
        return Err(StageError::input(format!(
            "batch has no rows ({} read from source)",
            raw.rows_seen
        )));
    }

    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(raw.headers.len());
    for (idx, header) in raw.headers.iter().enumerate() {
        let name = normalize_column_name(header);
        if name.is_empty() {
            return Err(StageError::input(format!("column {} has an empty name", idx + 1)));
        }
        if !seen.insert(name.clone()) {
            return Err(StageError::input(format!(
                "column name collision: '{}' normalizes to '{}' which already exists",
                header, name
            )));
        }
        names.push(name);
    }

    let mut columns = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let cells: Vec<Option<&str>> = raw
            .rows
            .iter()
            .map(|row| row.get(idx).and_then(|c| c.as_deref()).filter(|c| !is_null_token(c)))
            .collect();

        let logical_type = detect_type(cells.iter().flatten().copied());
        let values = cells
            .into_iter()
            .map(|cell| cell.map_or(Value::Null, |c| convert(c, logical_type)))
            .collect();
        columns.push(BatchColumn::new(name.clone(), logical_type, values));
    }

    let mut batch = Batch::new(columns).map_err(|e| StageError::input(e.to_string()))?;
    if sampled {
        batch = batch.with_sampling(raw.rows_seen);
    }

    Ok(LoadedBatch {
        rows_loaded: batch.row_count(),
        columns: names,
        sampled,
        batch,
    })
}

fn is_null_token(cell: &str) -> bool {
    let trimmed = cell.trim();
    NULL_TOKENS.iter().any(|t| trimmed.eq_ignore_ascii_case(t))
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Finite floats only; `inf` and overflowing literals stay text
fn parse_float(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_timestamp(cell: &str) -> bool {
    let cell = cell.trim();
    DateTime::parse_from_rfc3339(cell).is_ok()
        || TIMESTAMP_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(cell, f).is_ok())
}

fn is_date(cell: &str) -> bool {
    NaiveDate::parse_from_str(cell.trim(), "%Y-%m-%d").is_ok()
}

/// First type, in BOOL, INT, FLOAT, TIMESTAMP, DATE order, that every non-null
/// cell parses as. STRING otherwise; UNKNOWN when there are no non-null cells.
pub fn detect_type<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> LogicalType {
    let mut non_null = cells.clone().peekable();
    if non_null.peek().is_none() {
        return LogicalType::Unknown;
    }

    let all = |pred: fn(&str) -> bool| cells.clone().all(pred);

    if all(|c| parse_bool(c).is_some()) {
        LogicalType::Bool
    } else if all(|c| c.trim().parse::<i64>().is_ok()) {
        LogicalType::Int
    } else if all(|c| parse_float(c).is_some()) {
        LogicalType::Float
    } else if all(is_timestamp) {
        LogicalType::Timestamp
    } else if all(is_date) {
        LogicalType::Date
    } else {
        LogicalType::String
    }
}

fn convert(cell: &str, logical_type: LogicalType) -> Value {
    let parsed = match logical_type {
        LogicalType::Bool => parse_bool(cell).map(Value::Bool),
        LogicalType::Int => cell.trim().parse().ok().map(Value::Int),
        LogicalType::Float => parse_float(cell).map(Value::Float),
        LogicalType::Timestamp | LogicalType::Date => Some(Value::Text(cell.trim().to_string())),
        LogicalType::String | LogicalType::Unknown => None,
    };
    parsed.unwrap_or_else(|| Value::Text(cell.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryBatchSource;
    use pretty_assertions::assert_eq;

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| Some(c.to_string())).collect())
                .collect(),
            rows_seen: rows.len(),
        }
    }

    #[test]
    fn type_detection_order() {
        assert_eq!(detect_type(["true", "False"].into_iter()), LogicalType::Bool);
        assert_eq!(detect_type(["1", "-2"].into_iter()), LogicalType::Int);
        assert_eq!(detect_type(["1", "2.5"].into_iter()), LogicalType::Float);
        assert_eq!(
            detect_type(["2024-01-01T10:00:00Z", "2024-01-02 11:30:00"].into_iter()),
            LogicalType::Timestamp
        );
        assert_eq!(detect_type(["2024-01-01", "2024-02-29"].into_iter()), LogicalType::Date);
        assert_eq!(detect_type(["1", "abc"].into_iter()), LogicalType::String);
        assert_eq!(detect_type(std::iter::empty()), LogicalType::Unknown);
    }

    #[test]
    fn infinite_literals_are_not_floats() {
        assert_eq!(detect_type(["1.5", "inf"].into_iter()), LogicalType::String);
        assert_eq!(detect_type(["1.5", "-Infinity"].into_iter()), LogicalType::String);
        assert_eq!(detect_type(["1e400"].into_iter()), LogicalType::String);
        assert_eq!(detect_type(["1e308", "1.5"].into_iter()), LogicalType::Float);
    }

    #[test]
    fn normalizes_names_and_nulls() {
        let loaded = build_batch(
            raw(
                &[" Transaction ID", "Amount"],
                &[&["t1", "1.5"], &["t2", "NULL"], &["t3", " nan "]],
            ),
            false,
        )
        .unwrap();

        assert_eq!(loaded.columns, vec!["transaction_id", "amount"]);
        let amount = loaded.batch.column("amount").unwrap();
        assert_eq!(amount.logical_type, LogicalType::Float);
        assert_eq!(amount.null_count(), 2);
        assert_eq!(amount.values[0], Value::Float(1.5));
    }

    #[test]
    fn all_null_column_is_unknown() {
        let loaded = build_batch(raw(&["a", "b"], &[&["1", ""], &["2", "none"]]), false).unwrap();
        assert_eq!(loaded.batch.column("b").unwrap().logical_type, LogicalType::Unknown);
    }

    #[test]
    fn name_collision_stops() {
        let err = build_batch(raw(&["User ID", "user_id"], &[&["1", "2"]]), false).unwrap_err();
        assert!(err.to_string().contains("collision"));
    }

    #[test]
    fn zero_rows_stops() {
        let err = build_batch(raw(&["a"], &[]), false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn sampled_batch_keeps_source_count() {
        let mut table = raw(&["a"], &[&["1"], &["2"]]);
        table.rows_seen = 20;
        let loaded = build_batch(table, true).unwrap();
        assert!(loaded.batch.is_sampled());
        assert_eq!(loaded.batch.row_count(), 2);
        assert_eq!(loaded.batch.source_rows(), 20);
    }

    #[test]
    fn parse_failure_is_input_error() {
        let source = InMemoryBatchSource::new();
        source.insert("bad.jsonl", "{not json}\n", None);
        let outcome = load(&source, "bad.jsonl", &mut RowSampler::full());
        assert!(outcome.is_stop());
    }
}

//! Statistical profiler
//!
//! Pure functions of a batch. Numeric columns get descriptive statistics;
//! quality metrics cover every column.

use datagate_core::{Batch, BatchColumn, ColumnProfile, Contract, QualityMetrics, StatsSummary};

/// Profile every numeric column with at least one non-null value
pub fn profile(batch: &Batch) -> StatsSummary {
    batch
        .columns()
        .iter()
        .filter(|c| c.logical_type.is_numeric())
        .filter_map(|c| profile_column(c).map(|p| (c.name.clone(), p)))
        .collect()
}

/// Descriptive statistics of one column, `None` when it has no numeric values
pub fn profile_column(column: &BatchColumn) -> Option<ColumnProfile> {
    let values = column.numeric_values();
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let scale = magnitude(&values);
    let mean = values.iter().map(|v| v / scale).sum::<f64>() / n * scale;
    let deviations = scaled_deviations(&values, mean, scale);

    let mut sorted = values.clone();
    sorted.sort_by(f64::total_cmp);

    Some(ColumnProfile {
        count: values.len(),
        mean,
        std: sample_std(&deviations) * scale,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        median: quantile(&sorted, 0.5),
        skewness: skewness(&deviations),
        kurtosis: kurtosis(&deviations),
        null_pct: column.null_pct(),
        unique_ratio: column.distinct_count() as f64 / n,
    })
}

/// Largest absolute value, used to keep sums of huge values finite
fn magnitude(values: &[f64]) -> f64 {
    let max = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if max > 0.0 && max.is_finite() {
        max
    } else {
        1.0
    }
}

/// Deviations from the mean in units of `scale`; each lies within [-2, 2]
fn scaled_deviations(values: &[f64], mean: f64, scale: f64) -> Vec<f64> {
    values.iter().map(|v| v / scale - mean / scale).collect()
}

/// Linear-interpolated quantile of sorted values
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let pos = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            let frac = pos - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

fn central_moment(deviations: &[f64], power: i32) -> f64 {
    deviations.iter().map(|d| d.powi(power)).sum::<f64>() / deviations.len() as f64
}

fn sample_std(deviations: &[f64]) -> f64 {
    let n = deviations.len();
    if n < 2 {
        return 0.0;
    }
    let ss: f64 = deviations.iter().map(|d| d * d).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Adjusted Fisher-Pearson coefficient; 0 below three values or for constant data
fn skewness(deviations: &[f64]) -> f64 {
    let n = deviations.len() as f64;
    if deviations.len() < 3 {
        return 0.0;
    }
    let m2 = central_moment(deviations, 2);
    if m2 == 0.0 {
        return 0.0;
    }
    let m3 = central_moment(deviations, 3);
    let g1 = m3 / m2.powf(1.5);
    g1 * (n * (n - 1.0)).sqrt() / (n - 2.0)
}

/// Bias-corrected excess kurtosis; 0 below four values or for constant data
fn kurtosis(deviations: &[f64]) -> f64 {
    let n = deviations.len() as f64;
    if deviations.len() < 4 {
        return 0.0;
    }
    let m2 = central_moment(deviations, 2);
    if m2 == 0.0 {
        return 0.0;
    }
    let m4 = central_moment(deviations, 4);
    let g2 = m4 / (m2 * m2) - 3.0;
    ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
}

/// Key columns of a contract: the ones declared unique
pub fn key_columns(contract: Option<&Contract>) -> Vec<String> {
    contract
        .map(|c| {
            c.columns
                .iter()
                .filter(|col| col.constraints.unique)
                .map(|col| col.normalized_name())
                .collect()
        })
        .unwrap_or_default()
}

/// Completeness, key uniqueness and duplicate rows of a batch
pub fn quality_metrics(batch: &Batch, key_columns: &[String]) -> QualityMetrics {
    let columns = batch.columns();
    let completeness = if columns.is_empty() {
        100.0
    } else {
        100.0 - columns.iter().map(BatchColumn::null_pct).sum::<f64>() / columns.len() as f64
    };

    let rows = batch.row_count();
    let key_scores: Vec<f64> = key_columns
        .iter()
        .filter_map(|name| batch.column(name))
        .map(|c| {
            if rows == 0 {
                100.0
            } else {
                c.distinct_count() as f64 / rows as f64 * 100.0
            }
        })
        .collect();
    let uniqueness = if key_scores.is_empty() {
        100.0
    } else {
        key_scores.iter().sum::<f64>() / key_scores.len() as f64
    };

    QualityMetrics {
        completeness,
        uniqueness,
        duplicate_rows: batch.duplicate_rows(),
        overall_score: (completeness + uniqueness) / 2.0,
    }
}

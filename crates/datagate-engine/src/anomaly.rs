//! Anomaly stage: per-column outliers and the seasonal row-count check
//!
//! Flagged rows become quarantine candidates. They are annotated in the
//! report, never removed from the batch.

use chrono::{DateTime, Utc};
use datagate_core::{
    AnomalyConfig, AnomalyFindings, BaselineStatus, Batch, BatchColumn, ColumnOutliers,
    ColumnProfile, OutlierMethod, SeasonalCheck, StatsSummary,
};
use datagate_store::{BaselineStore, Bucket, HistoryQuery};

use crate::outcome::StageOutcome;
use crate::profiler::quantile;

/// Metric name of the per-run row count
pub const ROW_COUNT_METRIC: &str = "row_count";

/// Run identity the seasonal lookup is made for
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub dataset_id: &'a str,
    pub run_id: &'a str,
    pub as_of: DateTime<Utc>,
}

/// Detect outliers and compare the row count with its seasonal bucket
///
/// Outliers never warn on their own. A seasonal deviation beyond
/// `seasonal_sigma` warns; too little bucket history is informational.
pub fn detect(
    batch: &Batch,
    stats: &StatsSummary,
    run: RunContext<'_>,
    store: &dyn BaselineStore,
    config: &AnomalyConfig,
) -> StageOutcome<AnomalyFindings> {
    let outliers = stats
        .iter()
        .filter_map(|(name, profile)| {
            let column = batch.column(name)?;
            detect_outliers(column, profile, config)
        })
        .collect();

    let mut findings = AnomalyFindings {
        outliers,
        seasonal: None,
    };
    let mut reasons = Vec::new();

    match seasonal_check(batch.source_rows() as f64, run, store, config) {
        Ok(check) => {
            if check.anomalous {
                reasons.push(format!(
                    "row count {} deviates {:.1} sigma from {} baseline {:.1} (threshold {} sigma)",
                    check.current,
                    check.sigma.unwrap_or_default(),
                    check.bucket,
                    check.baseline_mean.unwrap_or_default(),
                    config.seasonal_sigma
                ));
            }
            findings.seasonal = Some(check);
        }
        Err(e) => {
            tracing::warn!(error = %e, "seasonal baseline unavailable");
            reasons.push(format!("seasonal baseline unavailable: {}", e));
        }
    }

    StageOutcome::warn_if(findings, reasons)
}

/// Outliers of one numeric column, `None` when nothing is flagged
///
/// Z-score is used for roughly symmetric columns (|skew| below the cutoff),
/// IQR fences otherwise.
pub fn detect_outliers(
    column: &BatchColumn,
    profile: &ColumnProfile,
    config: &AnomalyConfig,
) -> Option<ColumnOutliers> {
    let (method, lower, upper) = if profile.skewness.abs() < config.skew_cutoff {
        if profile.std == 0.0 {
            return None;
        }
        let spread = config.zscore_threshold * profile.std;
        (OutlierMethod::ZScore, profile.mean - spread, profile.mean + spread)
    } else {
        let mut sorted = column.numeric_values();
        sorted.sort_by(f64::total_cmp);
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        (
            OutlierMethod::Iqr,
            q1 - config.iqr_multiplier * iqr,
            q3 + config.iqr_multiplier * iqr,
        )
    };

    let rows: Vec<usize> = column
        .values
        .iter()
        .enumerate()
        .filter_map(|(row, value)| value.as_f64().map(|v| (row, v)))
        .filter(|(_, v)| *v < lower || *v > upper)
        .map(|(row, _)| row)
        .collect();

    if rows.is_empty() {
        return None;
    }

    tracing::debug!(
        column = %column.name,
        method = %method,
        lower,
        upper,
        flagged = rows.len(),
        "outliers detected"
    );

    Some(ColumnOutliers {
        column: column.name.clone(),
        method,
        lower,
        upper,
        count: rows.len(),
        rows,
    })
}

/// Compare a row count with the history of its seasonal bucket
pub fn seasonal_check(
    current: f64,
    run: RunContext<'_>,
    store: &dyn BaselineStore,
    config: &AnomalyConfig,
) -> Result<SeasonalCheck, datagate_store::StoreError> {
    let bucket = Bucket::for_timestamp(config.bucket, run.as_of);
    let query = HistoryQuery::new(run.dataset_id, ROW_COUNT_METRIC, run.as_of)
        .with_bucket(bucket)
        .with_lookback(config.lookback)
        .excluding_run(run.run_id);

    let mut check = SeasonalCheck {
        metric: ROW_COUNT_METRIC.to_string(),
        bucket: bucket.label(),
        status: BaselineStatus::NoBaseline,
        current,
        baseline_mean: None,
        baseline_std: None,
        sample_count: 0,
        sigma: None,
        anomalous: false,
    };

    let baseline = match store.baseline(&query)? {
        Some(baseline) => baseline,
        None => return Ok(check),
    };
    check.sample_count = baseline.sample_count;
    if baseline.sample_count < config.min_bucket_samples {
        tracing::debug!(
            bucket = %check.bucket,
            samples = baseline.sample_count,
            required = config.min_bucket_samples,
            "not enough seasonal history"
        );
        return Ok(check);
    }

    let std = if baseline.std > 0.0 {
        baseline.std
    } else {
        baseline.mean.abs() * 0.1
    };
    let sigma = if std > 0.0 {
        (current - baseline.mean).abs() / std
    } else if current == baseline.mean {
        0.0
    } else {
        f64::INFINITY
    };

    check.status = BaselineStatus::Ok;
    check.baseline_mean = Some(baseline.mean);
    check.baseline_std = Some(baseline.std);
    check.sigma = Some(sigma);
    check.anomalous = sigma > config.seasonal_sigma;
    Ok(check)
}

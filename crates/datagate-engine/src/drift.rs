//! Drift stage: compare this run with the rolling average of recent runs
//!
//! Unlike the seasonal check, drift ignores buckets. It never stops a run.

use datagate_core::{
    BaselineStatus, Batch, DriftConfig, DriftFindings, DriftWarning, Lookback, StatsSummary,
};
use datagate_store::{BaselineStore, HistoryQuery, StoreError};

use crate::anomaly::{RunContext, ROW_COUNT_METRIC};
use crate::outcome::StageOutcome;

/// Metric name of the per-run anomaly and drift flag count
pub const ANOMALY_FLAGS_METRIC: &str = "anomaly_flags";

/// Metric name of a column mean
pub fn mean_metric(column: &str) -> String {
    format!("{}.mean", column)
}

/// Current values of every drift metric: row count, then column means
pub fn current_metrics(batch: &Batch, stats: &StatsSummary) -> Vec<(String, f64)> {
    let mut metrics = vec![(ROW_COUNT_METRIC.to_string(), batch.source_rows() as f64)];
    metrics.extend(
        stats
            .iter()
            .map(|(column, profile)| (mean_metric(column), profile.mean)),
    );
    metrics
}

/// Compare current metrics with the last `window_runs` runs
pub fn detect(
    batch: &Batch,
    stats: &StatsSummary,
    run: RunContext<'_>,
    store: &dyn BaselineStore,
    config: &DriftConfig,
) -> StageOutcome<DriftFindings> {
    match compare(batch, stats, run, store, config) {
        Ok(findings) => {
            let reasons = findings
                .warnings
                .iter()
                .map(|w| {
                    format!(
                        "drift in {}: current {:.2} vs baseline {:.2} ({:.0}% > {:.0}%)",
                        w.metric,
                        w.current,
                        w.baseline,
                        w.deviation * 100.0,
                        config.threshold * 100.0
                    )
                })
                .collect();
            StageOutcome::warn_if(findings, reasons)
        }
        Err(e) => {
            tracing::warn!(error = %e, "drift history unavailable");
            StageOutcome::Warn(
                DriftFindings::default(),
                vec![format!("drift history unavailable: {}", e)],
            )
        }
    }
}

fn compare(
    batch: &Batch,
    stats: &StatsSummary,
    run: RunContext<'_>,
    store: &dyn BaselineStore,
    config: &DriftConfig,
) -> Result<DriftFindings, StoreError> {
    let query = |metric: &str| {
        HistoryQuery::new(run.dataset_id, metric, run.as_of)
            .with_lookback(Lookback::Runs(config.window_runs))
            .excluding_run(run.run_id)
    };

    let mut findings = DriftFindings::default();

    let flags = store.query(&query(ANOMALY_FLAGS_METRIC))?;
    findings.flag_window = flags.len();
    findings.flagged_runs = flags.iter().filter(|r| r.value > 0.0).count();

    let history = store.query(&query(ROW_COUNT_METRIC))?;
    findings.history_runs = history.len();
    if history.len() < config.min_history {
        tracing::debug!(
            runs = history.len(),
            required = config.min_history,
            "not enough history for drift"
        );
        return Ok(findings);
    }
    findings.status = BaselineStatus::Ok;

    for (metric, current) in current_metrics(batch, stats) {
        let Some(baseline) = store.baseline(&query(metric.as_str()))? else {
            continue;
        };
        if baseline.sample_count < config.min_history || baseline.mean == 0.0 {
            continue;
        }

        let deviation = (current - baseline.mean).abs() / baseline.mean.abs();
        tracing::debug!(%metric, current, baseline = baseline.mean, deviation, "drift comparison");
        if deviation > config.threshold {
            findings.warnings.push(DriftWarning {
                metric,
                current,
                baseline: baseline.mean,
                deviation,
            });
        }
    }

    Ok(findings)
}

//! Pre-load checks: duplicate content, freshness and size

use chrono::{DateTime, Utc};
use datagate_core::{SamplingConfig, SanityConfig, StageError};

use crate::outcome::StageOutcome;
use crate::source::SourceMetadata;

/// What the sanity stage learned about the batch
#[derive(Debug, Clone, PartialEq)]
pub struct SanityReport {
    pub size_bytes: u64,
    pub content_hash: String,

    /// Age in hours; 0 for modification times in the future
    pub age_hours: Option<f64>,

    /// The modification time was ahead of the clock beyond the tolerated skew
    pub clock_skew: bool,

    /// Raw size exceeds the sampling threshold
    pub needs_sampling: bool,
}

impl SanityReport {
    pub fn summary(&self) -> String {
        let age = self
            .age_hours
            .map(|h| format!("{:.1}h", h))
            .unwrap_or_else(|| "unknown".to_string());
        let mut summary = format!(
            "size={}B hash={} age={} sampling={}",
            self.size_bytes,
            &self.content_hash[..self.content_hash.len().min(12)],
            age,
            self.needs_sampling
        );
        if self.clock_skew {
            summary.push_str(" clock_skew=true");
        }
        summary
    }
}

/// Run the sanity checks, in order: duplicate, freshness, size
///
/// `freshness_sla_hours` is the effective SLA (contract override, else
/// pipeline config); no freshness check runs without one.
pub fn check(
    metadata: &SourceMetadata,
    recent_hashes: &[String],
    freshness_sla_hours: Option<f64>,
    sanity: &SanityConfig,
    sampling: &SamplingConfig,
    now: DateTime<Utc>,
) -> StageOutcome<SanityReport> {
    let mut report = SanityReport {
        size_bytes: metadata.size_bytes,
        content_hash: metadata.content_hash.clone(),
        age_hours: None,
        clock_skew: false,
        needs_sampling: metadata.size_bytes > sampling.threshold_bytes,
    };
    let mut reasons = Vec::new();

    if sanity.duplicate_window > 0 && recent_hashes.iter().any(|h| h == &metadata.content_hash) {
        let err = StageError::input(format!(
            "duplicate batch: content hash {} matches one of the last {} processed batches",
            metadata.content_hash, sanity.duplicate_window
        ));
        return StageOutcome::Stop(Some(report), err);
    }

    if let Some(modified) = metadata.modified {
        let ahead = modified - now;
        if ahead.num_seconds() > sanity.max_clock_skew_secs as i64 {
            tracing::warn!(ahead_secs = ahead.num_seconds(), "batch modification time is in the future");
            report.clock_skew = true;
        }
        let age_secs = (now - modified).num_seconds().max(0);
        report.age_hours = Some(age_secs as f64 / 3600.0);
    }

    if let Some(sla) = freshness_sla_hours {
        match report.age_hours {
            Some(age) if age > sla => {
                let err = StageError::input(format!(
                    "stale batch: age {:.1}h exceeds freshness SLA {}h",
                    age, sla
                ));
                return StageOutcome::Stop(Some(report), err);
            }
            Some(_) => {}
            None => reasons.push("modification time unavailable; freshness not checked".to_string()),
        }
    }

    if report.needs_sampling {
        tracing::debug!(
            size = metadata.size_bytes,
            threshold = sampling.threshold_bytes,
            "batch exceeds sampling threshold"
        );
    }

    StageOutcome::warn_if(report, reasons)
}

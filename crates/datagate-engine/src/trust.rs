//! Trust score aggregation and the health indicator derived from it

use datagate_core::{
    HealthIndicator, HealthStatus, Priority, QualityMetrics, RiskLevel, TrustComponents,
    TrustWeights, Verdict,
};

use crate::outcome::StageOutcome;

const MAX_RECOMMENDATIONS: usize = 3;

/// Everything the score is computed from
#[derive(Debug, Clone, Copy)]
pub struct TrustInputs<'a> {
    /// Verdict accumulated by the earlier stages
    pub verdict: Verdict,
    pub quality: &'a QualityMetrics,

    /// Anomaly and drift flags raised by this run
    pub current_flags: usize,

    /// Recent runs in the flag window, and how many of them were flagged
    pub flag_window: usize,
    pub flagged_runs: usize,
    pub priority: Option<Priority>,
}

/// Score the run; this stage always continues
pub fn aggregate(inputs: TrustInputs<'_>, weights: &TrustWeights) -> StageOutcome<HealthIndicator> {
    StageOutcome::Continue(health_indicator(inputs, weights))
}

/// Share of unflagged runs over the recent window plus the current run
pub fn history_stability(flag_window: usize, flagged_runs: usize, current_flagged: bool) -> f64 {
    let total = flag_window + 1;
    let flagged = flagged_runs.min(flag_window) + usize::from(current_flagged);
    100.0 * (total - flagged) as f64 / total as f64
}

pub fn verdict_score(verdict: Verdict) -> f64 {
    match verdict {
        Verdict::Passed => 100.0,
        Verdict::Warning => 60.0,
        Verdict::Blocked => 0.0,
    }
}

/// Weighted trust score clamped to [0, 100], with components
pub fn trust_score(inputs: &TrustInputs<'_>, weights: &TrustWeights) -> (f64, TrustComponents) {
    let components = TrustComponents {
        history_stability: history_stability(
            inputs.flag_window,
            inputs.flagged_runs,
            inputs.current_flags > 0,
        ),
        verdict_score: verdict_score(inputs.verdict),
        quality_score: inputs.quality.overall_score.clamp(0.0, 100.0),
    };

    let w = weights.normalized();
    let score = w.history * components.history_stability
        + w.verdict * components.verdict_score
        + w.quality * components.quality_score;
    (score.clamp(0.0, 100.0), components)
}

/// Full health indicator for a run that was not blocked earlier
pub fn health_indicator(inputs: TrustInputs<'_>, weights: &TrustWeights) -> HealthIndicator {
    let (score, components) = trust_score(&inputs, weights);
    let status = HealthStatus::from_score(score);

    let mut risk = if score >= 90.0 {
        RiskLevel::Low
    } else if score >= 70.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };
    if inputs.priority == Some(Priority::High) && inputs.verdict != Verdict::Passed {
        risk = RiskLevel::High;
    }

    let indicator = HealthIndicator {
        score,
        status,
        safe_to_use: inputs.verdict != Verdict::Blocked && score >= 70.0,
        risk_assessment: risk,
        summary: summary(score).to_string(),
        recommendations: recommendations(score, inputs.quality),
        components: Some(components),
    };

    tracing::debug!(
        score = indicator.score,
        status = ?indicator.status,
        safe = indicator.safe_to_use,
        "trust score"
    );
    indicator
}

fn summary(score: f64) -> &'static str {
    if score >= 90.0 {
        "Data is healthy and ready for production use"
    } else if score >= 70.0 {
        "Data has minor issues but is usable with caution"
    } else if score >= 50.0 {
        "Data quality is degraded and requires attention"
    } else {
        "Data has critical issues and should not be used"
    }
}

/// Specific findings first, then general guidance for the score band
fn recommendations(score: f64, quality: &QualityMetrics) -> Vec<String> {
    let mut recs = Vec::new();
    if quality.completeness < 80.0 {
        recs.push("High null rate detected - investigate data collection");
    }
    if quality.uniqueness < 90.0 {
        recs.push("Duplicate records found - check for pipeline replays");
    }

    let general: &[&str] = if score >= 90.0 {
        &["Continue monitoring for any degradation", "No immediate action required"]
    } else if score >= 70.0 {
        &[
            "Review non-critical warnings",
            "Monitor for further degradation",
            "Consider fixing issues during next maintenance window",
        ]
    } else if score >= 50.0 {
        &[
            "Investigate root causes of quality issues",
            "Consider blocking new data ingestion",
            "Alert data source owners",
        ]
    } else {
        &[
            "Block data from production immediately",
            "Investigate critical errors",
            "Contact data source team urgently",
        ]
    };
    recs.extend(general);

    recs.into_iter()
        .take(MAX_RECOMMENDATIONS)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inputs(verdict: Verdict, quality: &QualityMetrics) -> TrustInputs<'_> {
        TrustInputs {
            verdict,
            quality,
            current_flags: 0,
            flag_window: 0,
            flagged_runs: 0,
            priority: None,
        }
    }

    #[test]
    fn clean_run_scores_100() {
        let quality = QualityMetrics::default();
        let indicator = health_indicator(inputs(Verdict::Passed, &quality), &TrustWeights::default());
        assert!((indicator.score - 100.0).abs() < 1e-9);
        assert_eq!(indicator.status, HealthStatus::Healthy);
        assert!(indicator.safe_to_use);
        assert_eq!(indicator.risk_assessment, RiskLevel::Low);
        assert_eq!(
            indicator.recommendations,
            vec!["Continue monitoring for any degradation", "No immediate action required"]
        );
    }

    #[test]
    fn history_stability_counts_current_run() {
        assert_eq!(history_stability(0, 0, false), 100.0);
        assert_eq!(history_stability(0, 0, true), 0.0);
        assert_eq!(history_stability(3, 1, false), 75.0);
        assert_eq!(history_stability(3, 1, true), 50.0);
    }

    #[test]
    fn warning_verdict_weighting() {
        let quality = QualityMetrics::default();
        let (score, components) = trust_score(&inputs(Verdict::Warning, &quality), &TrustWeights::default());
        assert_eq!(components.verdict_score, 60.0);
        // 0.40 * 100 + 0.35 * 60 + 0.25 * 100
        assert!((score - 86.0).abs() < 1e-9);
    }

    #[test]
    fn weights_are_normalized() {
        let quality = QualityMetrics::default();
        let weights = TrustWeights {
            history: 2.0,
            verdict: 2.0,
            quality: 0.0,
        };
        let (score, _) = trust_score(&inputs(Verdict::Warning, &quality), &weights);
        assert!((score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn high_priority_escalates_risk() {
        let quality = QualityMetrics::default();
        let mut high = inputs(Verdict::Warning, &quality);
        high.priority = Some(Priority::High);
        let indicator = health_indicator(high, &TrustWeights::default());
        assert_eq!(indicator.status, HealthStatus::Degraded);
        assert_eq!(indicator.risk_assessment, RiskLevel::High);
    }

    #[test]
    fn quality_findings_lead_recommendations() {
        let quality = QualityMetrics {
            completeness: 60.0,
            uniqueness: 80.0,
            duplicate_rows: 3,
            overall_score: 70.0,
        };
        let indicator = health_indicator(inputs(Verdict::Warning, &quality), &TrustWeights::default());
        assert_eq!(indicator.recommendations.len(), 3);
        assert!(indicator.recommendations[0].starts_with("High null rate"));
        assert!(indicator.recommendations[1].starts_with("Duplicate records"));
    }

    #[test]
    fn score_stays_in_range() {
        let quality = QualityMetrics {
            completeness: 0.0,
            uniqueness: 0.0,
            duplicate_rows: 10,
            overall_score: -5.0,
        };
        let mut worst = inputs(Verdict::Blocked, &quality);
        worst.current_flags = 4;
        worst.flag_window = 5;
        worst.flagged_runs = 5;
        let indicator = health_indicator(worst, &TrustWeights::default());
        assert_eq!(indicator.score, 0.0);
        assert!(!indicator.safe_to_use);
    }
}

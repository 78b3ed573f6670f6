//! Per-stage findings attached to the run report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SafetyGate;
use crate::schema::{Contract, Criticality};

/// Descriptive statistics of one numeric column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    /// Non-null values the statistics were computed over
    pub count: usize,
    pub mean: f64,

    /// Sample standard deviation (n - 1)
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,

    /// Adjusted Fisher-Pearson skewness
    pub skewness: f64,

    /// Bias-corrected excess kurtosis
    pub kurtosis: f64,
    pub null_pct: f64,

    /// Distinct non-null values over non-null values
    pub unique_ratio: f64,
}

/// Profiles keyed by column name
pub type StatsSummary = BTreeMap<String, ColumnProfile>;

/// Batch-wide quality metrics, each in [0, 100] except the duplicate count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// 100 minus the mean null percentage over all columns
    pub completeness: f64,

    /// Mean distinct percentage over key columns (100 when there are none)
    pub uniqueness: f64,

    /// Rows identical to an earlier row
    pub duplicate_rows: usize,

    /// Mean of completeness and uniqueness
    pub overall_score: f64,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            completeness: 100.0,
            uniqueness: 100.0,
            duplicate_rows: 0,
            overall_score: 100.0,
        }
    }
}

/// Outlier detection method chosen for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    ZScore,
    Iqr,
}

impl std::fmt::Display for OutlierMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZScore => write!(f, "z_score"),
            Self::Iqr => write!(f, "iqr"),
        }
    }
}

/// Outliers found in one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnOutliers {
    pub column: String,
    pub method: OutlierMethod,

    /// Accepted value range
    pub lower: f64,
    pub upper: f64,

    /// Number of flagged rows
    pub count: usize,

    /// Row indices of flagged rows
    pub rows: Vec<usize>,
}

/// Whether a comparison had enough history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaselineStatus {
    #[default]
    NoBaseline,
    Ok,
}

impl std::fmt::Display for BaselineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoBaseline => write!(f, "NO_BASELINE"),
            Self::Ok => write!(f, "OK"),
        }
    }
}

/// Row count compared against its seasonal bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalCheck {
    pub metric: String,

    /// Bucket label, e.g. `day_of_week:5`
    pub bucket: String,
    pub status: BaselineStatus,
    pub current: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_mean: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_std: Option<f64>,
    pub sample_count: usize,

    /// Deviation in standard deviations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    pub anomalous: bool,
}

/// Anomaly stage findings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnomalyFindings {
    pub outliers: Vec<ColumnOutliers>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seasonal: Option<SeasonalCheck>,
}

impl AnomalyFindings {
    /// Number of seasonal flags raised this run
    pub fn flag_count(&self) -> usize {
        self.seasonal.as_ref().map_or(0, |s| s.anomalous as usize)
    }

    /// Flagged rows across all columns, sorted and deduplicated
    pub fn quarantine_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .outliers
            .iter()
            .flat_map(|o| o.rows.iter().copied())
            .collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

/// One metric outside the drift threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftWarning {
    pub metric: String,
    pub current: f64,
    pub baseline: f64,

    /// |current - baseline| / baseline
    pub deviation: f64,
}

/// Drift stage findings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriftFindings {
    pub status: BaselineStatus,

    /// Historical runs in the comparison window
    pub history_runs: usize,
    pub warnings: Vec<DriftWarning>,

    /// Recent runs with a recorded flag count
    pub flag_window: usize,

    /// Recent runs that raised at least one anomaly or drift flag
    pub flagged_runs: usize,
}

impl DriftFindings {
    pub fn flag_count(&self) -> usize {
        self.warnings.len()
    }
}

/// Alert routing priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl From<Criticality> for Priority {
    fn from(tier: Criticality) -> Self {
        match tier {
            Criticality::Critical | Criticality::High => Priority::High,
            Criticality::Medium => Priority::Medium,
            Criticality::Low => Priority::Low,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Impact stage findings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TablePriority {
    pub tier: Priority,

    /// Effective criticality after considering consumers
    pub criticality: Criticality,

    /// Whether the lineage graph knew this dataset
    pub in_lineage: bool,

    /// Direct consumers
    pub consumers: Vec<String>,

    /// Transitive downstream datasets
    pub blast_radius: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Healthy
        } else if score >= 70.0 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Weighted inputs of the trust score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustComponents {
    pub history_stability: f64,
    pub verdict_score: f64,
    pub quality_score: f64,
}

/// Trust score with the guidance derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIndicator {
    /// Trust score in [0, 100]
    pub score: f64,
    pub status: HealthStatus,
    pub safe_to_use: bool,
    pub risk_assessment: RiskLevel,
    pub summary: String,
    pub recommendations: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<TrustComponents>,
}

impl HealthIndicator {
    /// Indicator used when a run was blocked before scoring
    pub fn blocked() -> Self {
        Self {
            score: 0.0,
            status: HealthStatus::Critical,
            safe_to_use: false,
            risk_assessment: RiskLevel::High,
            summary: "Data has critical issues and should not be used".to_string(),
            recommendations: vec![
                "Fix critical schema violations immediately".to_string(),
                "Review the contract or data source".to_string(),
            ],
            components: None,
        }
    }
}

/// What the remediation actuator did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationOutcome {
    /// Proposal attached for review; nothing written
    PendingApproval { proposal: Contract },

    /// New version written after backing up the prior one
    Applied { version: u32, backup: String },

    /// A safety gate failed; the active contract is unchanged
    Rejected { gate: SafetyGate, reason: String },
}

/// Result of an explicit contract approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub accepted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl ApprovalResult {
    pub fn accepted(version: u32) -> Self {
        Self {
            accepted: true,
            reason: None,
            version: Some(version),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            version: None,
        }
    }
}

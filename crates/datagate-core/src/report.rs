//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};

use crate::diagnostic::Violation;
use crate::findings::{
    AnomalyFindings, DriftFindings, HealthIndicator, QualityMetrics, RemediationOutcome,
    StatsSummary, TablePriority,
};
use crate::schema::Contract;

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Pipeline stages, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Sanity,
    Load,
    Schema,
    Profile,
    Anomaly,
    Drift,
    Impact,
    Trust,
    Remediate,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Sanity,
        Stage::Load,
        Stage::Schema,
        Stage::Profile,
        Stage::Anomaly,
        Stage::Drift,
        Stage::Impact,
        Stage::Trust,
        Stage::Remediate,
    ];

    /// Following stage, `None` after the last one
    pub fn next(&self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sanity => "SANITY",
            Self::Load => "LOAD",
            Self::Schema => "SCHEMA",
            Self::Profile => "PROFILE",
            Self::Anomaly => "ANOMALY",
            Self::Drift => "DRIFT",
            Self::Impact => "IMPACT",
            Self::Trust => "TRUST",
            Self::Remediate => "REMEDIATE",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogOutcome {
    Continue,
    Warn,
    CriticalStop,
    ContractMissing,
    Skipped,
}

impl std::fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "CONTINUE"),
            Self::Warn => write!(f, "WARN"),
            Self::CriticalStop => write!(f, "CRITICAL_STOP"),
            Self::ContractMissing => write!(f, "CONTRACT_MISSING"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// One execution log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub stage: Stage,
    pub outcome: LogOutcome,
    pub duration_ms: u64,

    /// Payload summary, including compared values and thresholds
    pub summary: String,
}

impl StageLogEntry {
    pub fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            outcome: LogOutcome::Skipped,
            duration_ms: 0,
            summary: reason.into(),
        }
    }
}

/// Terminal verdict; ordered so the maximum observed wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    #[default]
    Passed,
    Warning,
    Blocked,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Warning => write!(f, "WARNING"),
            Self::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Report status shown to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pass,
    PassWithWarnings,
    Fail,
    ContractMissing,
}

impl From<Verdict> for ReportStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Passed => Self::Pass,
            Verdict::Warning => Self::PassWithWarnings,
            Verdict::Blocked => Self::Fail,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::PassWithWarnings => write!(f, "PASS_WITH_WARNINGS"),
            Self::Fail => write!(f, "FAIL"),
            Self::ContractMissing => write!(f, "CONTRACT_MISSING"),
        }
    }
}

/// Run report (report.json v1)
///
/// Write-once: assembled by the orchestrator at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Batch reference the run evaluated
    pub file: String,
    pub dataset_id: String,
    pub run_id: String,
    pub status: ReportStatus,
    pub verdict: Verdict,

    /// One entry per stage, in run order
    pub execution_log: Vec<StageLogEntry>,
    pub critical_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub violations: Vec<Violation>,
    pub stats_summary: StatsSummary,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomalies: Option<AnomalyFindings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftFindings>,

    /// Flagged row indices (capped); rows are never removed
    pub quarantine_candidates: Vec<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_indicator: Option<HealthIndicator>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_priority: Option<TablePriority>,

    /// Draft contract, present when the dataset had none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred_contract: Option<Contract>,

    /// Contract the batch was evaluated against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_contract: Option<Contract>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationOutcome>,
}

impl RunReport {
    /// Create a new empty report
    pub fn new(
        file: impl Into<String>,
        dataset_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            file: file.into(),
            dataset_id: dataset_id.into(),
            run_id: run_id.into(),
            status: ReportStatus::Pass,
            verdict: Verdict::Passed,
            execution_log: Vec::new(),
            critical_errors: Vec::new(),
            warnings: Vec::new(),
            violations: Vec::new(),
            stats_summary: StatsSummary::new(),
            quality_metrics: None,
            anomalies: None,
            drift: None,
            quarantine_candidates: Vec::new(),
            health_indicator: None,
            table_priority: None,
            inferred_contract: None,
            active_contract: None,
            remediation: None,
        }
    }

    /// Check if the run failed
    pub fn is_failure(&self) -> bool {
        self.status == ReportStatus::Fail
    }

    /// Log entry for a stage, if it ran or was skipped
    pub fn log_entry(&self, stage: Stage) -> Option<&StageLogEntry> {
        self.execution_log.iter().find(|e| e.stage == stage)
    }

    /// Stages that actually executed
    pub fn executed_stages(&self) -> Vec<Stage> {
        self.execution_log
            .iter()
            .filter(|e| e.outcome != LogOutcome::Skipped)
            .map(|e| e.stage)
            .collect()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report() {
        let report = RunReport::new("batch.csv", "transactions", "abc");
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.status, ReportStatus::Pass);
        assert!(!report.is_failure());
        assert!(report.executed_stages().is_empty());
    }

    #[test]
    fn verdict_ordering_and_status() {
        assert!(Verdict::Blocked > Verdict::Warning);
        assert!(Verdict::Warning > Verdict::Passed);
        assert_eq!(ReportStatus::from(Verdict::Warning), ReportStatus::PassWithWarnings);
        assert_eq!(ReportStatus::from(Verdict::Blocked), ReportStatus::Fail);
    }

    #[test]
    fn stage_order() {
        assert_eq!(Stage::Sanity.next(), Some(Stage::Load));
        assert_eq!(Stage::Trust.next(), Some(Stage::Remediate));
        assert_eq!(Stage::Remediate.next(), None);
    }

    #[test]
    fn report_serialization() {
        let mut report = RunReport::new("batch.csv", "transactions", "abc");
        report.execution_log.push(StageLogEntry::skipped(Stage::Drift, "blocked"));
        report.status = ReportStatus::PassWithWarnings;

        let json = report.to_json().unwrap();
        assert!(json.contains("\"PASS_WITH_WARNINGS\""));
        assert!(json.contains("\"SKIPPED\""));
        assert!(!json.contains("\"inferred_contract\""));
    }
}

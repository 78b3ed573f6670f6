//! Datagate Core
//!
//! Core domain model with stable, versioned types.
//! Never rename issue codes - they are part of the report format.

pub mod batch;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod findings;
pub mod report;
pub mod schema;

pub use batch::{content_hash, derive_run_id, Batch, BatchColumn, BatchError, RawTable, RowSampler, Value};
pub use config::{
    AnomalyConfig, BucketKind, ConfigError, DriftConfig, Lookback, PipelineConfig,
    RemediationConfig, ReportConfig, SamplingConfig, SanityConfig, TrustWeights,
};
pub use diagnostic::{IssueCode, Severity, Violation};
pub use error::{SafetyGate, StageError};
pub use findings::{
    AnomalyFindings, ApprovalResult, BaselineStatus, ColumnOutliers, ColumnProfile,
    DriftFindings, DriftWarning, HealthIndicator, HealthStatus, OutlierMethod, Priority,
    QualityMetrics, RemediationOutcome, RiskLevel, SeasonalCheck, StatsSummary, TablePriority,
    TrustComponents,
};
pub use report::{LogOutcome, ReportStatus, ReportVersion, RunReport, Stage, StageLogEntry, Verdict};
pub use schema::{
    compile_pattern, normalize_column_name, ColumnSpec, Constraint, ConstraintSet, Contract,
    ContractConstraints, ContractError, Criticality, ForeignKey, Lifecycle, LifecycleStatus,
    LogicalType,
};

//! Violation codes and severities
//!
//! IMPORTANT: Issue codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the report format.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Issue code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    // Structural issues
    /// A column declared by the contract is absent from the batch
    Missing,

    /// A column present in the batch is not declared by the contract
    Extra,

    /// The detected column type is incompatible with the declared type
    TypeMismatch,

    // Constraint issues
    /// Null percentage exceeds `nullable_max_pct`
    NullRate,

    /// Duplicate values in a column declared unique
    Duplicate,

    /// Values below the declared minimum
    BelowMin,

    /// Values above the declared maximum
    AboveMax,

    /// Values not matching the declared pattern
    PatternMismatch,

    /// Values outside the declared allowed set
    DisallowedValue,

    // Cross-dataset issues
    /// Values with no matching key in a referenced dataset
    OrphanKey,
}

impl IssueCode {
    /// Get the issue code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Extra => "extra",
            Self::TypeMismatch => "type_mismatch",
            Self::NullRate => "null_rate",
            Self::Duplicate => "duplicate",
            Self::BelowMin => "below_min",
            Self::AboveMax => "above_max",
            Self::PatternMismatch => "pattern_mismatch",
            Self::DisallowedValue => "disallowed_value",
            Self::OrphanKey => "orphan_key",
        }
    }

    /// Whether this issue describes schema evolution (new columns or changed types)
    /// rather than a data-quality failure.
    pub fn is_evolution(&self) -> bool {
        matches!(self, Self::Extra | Self::TypeMismatch)
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Violation severity, declared per contract column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Should be reviewed but never blocks a run
    Warning,

    /// Blocks the run
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A single contract violation.
///
/// Violations are immutable once emitted and are copied verbatim into the
/// run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Column the violation refers to
    pub column: String,

    /// Stable issue code
    pub issue: IssueCode,

    /// Severity level
    pub severity: Severity,

    /// What the contract expected
    pub expected: String,

    /// What the batch contained
    pub actual: String,
}

impl Violation {
    /// Create a new violation
    pub fn new(
        column: impl Into<String>,
        issue: IssueCode,
        severity: Severity,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            issue,
            severity,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether this violation blocks the run
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Human-readable one-line description
    pub fn describe(&self) -> String {
        format!(
            "Column '{}': {} (expected: {}, actual: {})",
            self.column, self.issue, self.expected, self.actual
        )
    }
}

//! Contract model and canonical type system

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::diagnostic::Severity;

/// Portable logical type system
///
/// Maps physical type names used in contract documents, and the types
/// detected while loading a batch, to a common representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogicalType {
    /// Boolean type
    Bool,

    /// Integer type (any precision)
    Int,

    /// Floating point or decimal
    Float,

    /// String/text type
    String,

    /// Date (no time component)
    Date,

    /// Timestamp (with time component)
    Timestamp,

    /// Unknown type (column was entirely null)
    Unknown,
}

impl LogicalType {
    /// Parse a physical type name into a logical type
    ///
    /// Returns `None` for names that are not recognized, so that a contract
    /// with a typo fails when it is loaded rather than mid-run.
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        // Drop precision/scale: decimal(10, 2) -> decimal
        let base = match lower.find('(') {
            Some(idx) => lower[..idx].trim(),
            None => lower.as_str(),
        };

        match base {
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "int64" | "int32" | "int16"
            | "int8" | "long" => Some(Self::Int),
            "float" | "double" | "real" | "float64" | "float32" | "decimal" | "numeric"
            | "number" => Some(Self::Float),
            "string" | "varchar" | "char" | "text" | "character varying" | "character" | "str" => {
                Some(Self::String)
            }
            "bool" | "boolean" => Some(Self::Bool),
            "date" => Some(Self::Date),
            "timestamp" | "datetime" | "timestamptz" | "timestamp_ntz" | "timestamp_tz" => {
                Some(Self::Timestamp)
            }
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether values of this type are numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    /// Canonical lowercase name used in contract documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Unknown => "unknown",
        }
    }

    /// Check whether an observed type satisfies a declared type
    ///
    /// Lenient in the directions that never lose information: any type can be
    /// read as a string, integers are valid floats and dates are valid
    /// timestamps. An all-null column (unknown type) satisfies anything.
    pub fn accepts(&self, observed: &LogicalType) -> bool {
        match (self, observed) {
            (a, b) if a == b => true,
            (_, Self::Unknown) | (Self::Unknown, _) => true,
            (Self::String, _) => true,
            (Self::Float, Self::Int) => true,
            (Self::Timestamp, Self::Date) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for LogicalType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown column type '{}'", value))
    }
}

impl From<LogicalType> for String {
    fn from(value: LogicalType) -> Self {
        value.as_str().to_string()
    }
}

/// Canonicalize a column name: trim, lowercase, collapse whitespace runs to `_`
pub fn normalize_column_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Dataset criticality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Criticality {
    /// Parse a tier name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Contract lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// Generated or proposed, awaiting approval
    Draft,

    /// Enforced
    #[default]
    Active,

    /// Kept for history only
    Deprecated,
}

/// Lifecycle metadata of a contract version
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lifecycle {
    #[serde(default)]
    pub status: LifecycleStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// When this version was created (RFC 3339 string in documents)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A declared referential key: `column` values must exist in `dataset.key`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKey {
    pub column: String,
    pub dataset: String,
    pub key: String,
}

/// Dataset-level constraints
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractConstraints {
    /// Maximum batch age in hours; overrides the pipeline default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness_sla_hours: Option<f64>,

    /// Referential keys into other datasets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ForeignKey>,
}

/// Column constraints as written in contract documents
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable_max_pct: Option<f64>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

/// One constraint rule, expanded from a [`ConstraintSet`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint<'a> {
    NullableMaxPct(f64),
    Unique,
    Min(f64),
    Max(f64),
    Pattern(&'a str),
    AllowedValues(&'a [String]),
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nullable_max_pct(mut self, pct: f64) -> Self {
        self.nullable_max_pct = Some(pct);
        self
    }

    pub fn not_null(self) -> Self {
        self.nullable_max_pct(0.0)
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Expand into individual rules, in evaluation order
    pub fn rules(&self) -> Vec<Constraint<'_>> {
        let mut rules = Vec::new();
        if let Some(pct) = self.nullable_max_pct {
            rules.push(Constraint::NullableMaxPct(pct));
        }
        if self.unique {
            rules.push(Constraint::Unique);
        }
        if let Some(min) = self.min {
            rules.push(Constraint::Min(min));
        }
        if let Some(max) = self.max {
            rules.push(Constraint::Max(max));
        }
        if let Some(pattern) = &self.pattern {
            rules.push(Constraint::Pattern(pattern));
        }
        if let Some(values) = &self.allowed_values {
            rules.push(Constraint::AllowedValues(values));
        }
        rules
    }

    fn validate(&self, column: &str) -> Result<(), ContractError> {
        let invalid = |reason: String| ContractError::InvalidConstraint {
            column: column.to_string(),
            reason,
        };

        if let Some(pct) = self.nullable_max_pct {
            if !(0.0..=100.0).contains(&pct) {
                return Err(invalid(format!("nullable_max_pct {} outside 0..=100", pct)));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(invalid(format!("min {} greater than max {}", min, max)));
            }
        }
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(invalid("range bounds must be finite".to_string()));
            }
        }
        if let Some(pattern) = &self.pattern {
            compile_pattern(pattern).map_err(|e| invalid(format!("invalid pattern: {}", e)))?;
        }
        if let Some(values) = &self.allowed_values {
            if values.is_empty() {
                return Err(invalid("allowed_values must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Compile a contract pattern as a full-match regular expression
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

/// A declared column with its severity and constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,

    /// Declared logical type
    #[serde(rename = "type")]
    pub logical_type: LogicalType,

    /// Severity of every violation on this column
    #[serde(default = "default_severity")]
    pub severity: Severity,

    /// Constraints
    #[serde(default)]
    pub constraints: ConstraintSet,
}

fn default_severity() -> Severity {
    Severity::Warning
}

impl ColumnSpec {
    /// Create a new column with no constraints
    pub fn new(name: impl Into<String>, logical_type: LogicalType, severity: Severity) -> Self {
        Self {
            name: name.into(),
            logical_type,
            severity,
            constraints: ConstraintSet::default(),
        }
    }

    /// Set constraints
    pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = constraints;
        self
    }

    /// Normalized name used for matching against batch columns
    pub fn normalized_name(&self) -> String {
        normalize_column_name(&self.name)
    }
}

/// A versioned data contract for one dataset
///
/// Contracts are immutable once persisted: a change is a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contract {
    /// Dataset this contract governs
    pub dataset_id: String,

    /// Monotonic version number, starting at 1
    pub version: u32,

    /// Criticality tier declared by the owner
    #[serde(default)]
    pub criticality: Criticality,

    /// Lifecycle metadata
    #[serde(default)]
    pub lifecycle: Lifecycle,

    /// Dataset-level constraints
    #[serde(default)]
    pub constraints: ContractConstraints,

    /// Declared columns, in order
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

impl Contract {
    /// Create a new active contract
    pub fn new(dataset_id: impl Into<String>, version: u32, columns: Vec<ColumnSpec>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            version,
            criticality: Criticality::default(),
            lifecycle: Lifecycle::default(),
            constraints: ContractConstraints::default(),
            columns,
        }
    }

    /// Set criticality
    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Set lifecycle
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set dataset-level constraints
    pub fn with_constraints(mut self, constraints: ContractConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Find a column by name (normalized comparison)
    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        let wanted = normalize_column_name(name);
        self.columns.iter().find(|c| c.normalized_name() == wanted)
    }

    /// Get normalized column names
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.normalized_name()).collect()
    }

    /// Check the contract is well formed
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.dataset_id.trim().is_empty() {
            return Err(ContractError::EmptyDatasetId);
        }
        if self.version == 0 {
            return Err(ContractError::InvalidVersion(self.version));
        }
        if let Some(sla) = self.constraints.freshness_sla_hours {
            if !(sla > 0.0) {
                return Err(ContractError::InvalidFreshness(sla));
            }
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            let name = column.normalized_name();
            if name.is_empty() {
                return Err(ContractError::DuplicateColumn(column.name.clone()));
            }
            if !seen.insert(name) {
                return Err(ContractError::DuplicateColumn(column.name.clone()));
            }
            column.constraints.validate(&column.name)?;
        }

        for reference in &self.constraints.references {
            if self.find_column(&reference.column).is_none() {
                return Err(ContractError::InvalidReference {
                    column: reference.column.clone(),
                    reason: "column is not declared".to_string(),
                });
            }
            if reference.dataset.trim().is_empty() || reference.key.trim().is_empty() {
                return Err(ContractError::InvalidReference {
                    column: reference.column.clone(),
                    reason: "referenced dataset and key must be set".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Parse and validate a contract document (TOML)
    pub fn from_toml(toml: &str) -> Result<Self, ContractError> {
        let contract: Contract =
            toml::from_str(toml).map_err(|e| ContractError::Parse(e.to_string()))?;
        contract.validate()?;
        Ok(contract)
    }

    /// Serialize to a contract document (TOML)
    pub fn to_toml(&self) -> Result<String, ContractError> {
        toml::to_string_pretty(self).map_err(|e| ContractError::Serialize(e.to_string()))
    }
}

/// Contract error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContractError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Contract has an empty dataset id")]
    EmptyDatasetId,

    #[error("Invalid contract version {0} (versions start at 1)")]
    InvalidVersion(u32),

    #[error("Invalid freshness SLA {0}h (must be positive)")]
    InvalidFreshness(f64),

    #[error("Duplicate or empty column name '{0}'")]
    DuplicateColumn(String),

    #[error("Invalid constraint on column '{column}': {reason}")]
    InvalidConstraint { column: String, reason: String },

    #[error("Invalid reference on column '{column}': {reason}")]
    InvalidReference { column: String, reason: String },
}

//! Stage error taxonomy

use serde::{Deserialize, Serialize};

/// Safety gates that must hold before a contract rewrite is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyGate {
    /// Every column of the prior version is still present
    NoColumnRemoved,

    /// The proposal passes contract validation
    Revalidation,

    /// The prior version was archived before the new one became active
    Backup,
}

impl std::fmt::Display for SafetyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoColumnRemoved => write!(f, "no_column_removed"),
            Self::Revalidation => write!(f, "revalidation"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

/// Errors a pipeline stage can stop or warn with
///
/// Every variant ends up in the execution log with the values and thresholds
/// that were compared.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    /// The batch or a collaborator could not be used; always fatal
    #[error("Input error: {0}")]
    InputError(String),

    /// Contract violations; fatal only when at least one is critical
    #[error("Contract violation: {critical} critical, {warnings} warning(s)")]
    ContractViolation { critical: usize, warnings: usize },

    /// Not enough history to compare against; informational
    #[error("No baseline: {0}")]
    NoBaseline(String),

    /// A remediation proposal was discarded; the active contract is unchanged
    #[error("Remediation gate '{gate}' failed: {reason}")]
    RemediationGateFailure { gate: SafetyGate, reason: String },
}

impl StageError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::InputError(message.into())
    }

    pub fn gate(gate: SafetyGate, reason: impl Into<String>) -> Self {
        Self::RemediationGateFailure {
            gate,
            reason: reason.into(),
        }
    }

    /// Whether this error ends the run
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InputError(_) => true,
            Self::ContractViolation { critical, .. } => *critical > 0,
            Self::NoBaseline(_) | Self::RemediationGateFailure { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        assert!(StageError::input("file not found").is_fatal());
        assert!(StageError::ContractViolation { critical: 1, warnings: 0 }.is_fatal());
        assert!(!StageError::ContractViolation { critical: 0, warnings: 2 }.is_fatal());
        assert!(!StageError::NoBaseline("row_count".into()).is_fatal());
        assert!(!StageError::gate(SafetyGate::Backup, "disk full").is_fatal());
    }

    #[test]
    fn gate_failure_message() {
        let err = StageError::gate(SafetyGate::NoColumnRemoved, "column 'amount' dropped");
        assert_eq!(
            err.to_string(),
            "Remediation gate 'no_column_removed' failed: column 'amount' dropped"
        );
    }
}

//! Contract self-healing behind safety gates
//!
//! A proposal only ever adds columns or widens WARNING-level types. It is
//! written after three gates pass, in order:
//! 1. no column of the active version is removed
//! 2. the proposal validates and supersedes the active version
//! 3. the active version is archived
//!
//! Any failure leaves the active contract untouched.

use chrono::Utc;
use datagate_core::{
    ApprovalResult, Batch, ColumnSpec, Contract, IssueCode, LifecycleStatus, RemediationOutcome,
    SafetyGate, Severity, StageError,
};
use datagate_registry::{ContractRepository, ContractVersionRef, RepositoryError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::outcome::StageOutcome;
use crate::schema_check::SchemaFindings;

/// A contract version written by the actuator
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedContract {
    pub version: u32,

    /// Archive of the version it replaced, if there was one
    pub backup: Option<ContractVersionRef>,
}

/// Proposes and applies contract rewrites
///
/// Writes for one dataset are serialized by a per-dataset lock.
pub struct RemediationActuator {
    repository: Arc<dyn ContractRepository>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RemediationActuator {
    pub fn new(repository: Arc<dyn ContractRepository>) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build the next version from the evolution the schema stage found
    ///
    /// WARNING-level type mismatches take the observed type and undeclared
    /// columns are appended as WARNING. `None` when there is nothing to evolve.
    pub fn propose(current: &Contract, findings: &SchemaFindings, batch: &Batch) -> Option<Contract> {
        let mut proposal = current.clone();
        let mut changed = false;

        for violation in findings.evolution() {
            let Some(column) = batch.column(&violation.column) else {
                continue;
            };

            match violation.issue {
                IssueCode::TypeMismatch if violation.severity == Severity::Warning => {
                    let wanted = column.name.as_str();
                    if let Some(spec) = proposal
                        .columns
                        .iter_mut()
                        .find(|c| c.normalized_name() == wanted)
                    {
                        spec.logical_type = column.logical_type;
                        changed = true;
                    }
                }
                IssueCode::Extra => {
                    if proposal.find_column(&column.name).is_none() {
                        proposal.columns.push(ColumnSpec::new(
                            column.name.clone(),
                            column.logical_type,
                            Severity::Warning,
                        ));
                        changed = true;
                    }
                }
                _ => {}
            }
        }

        if !changed {
            return None;
        }

        proposal.version = current.version + 1;
        proposal.lifecycle.status = LifecycleStatus::Draft;
        proposal.lifecycle.created_at = Some(Utc::now());
        Some(proposal)
    }

    /// Run the remediation stage for a proposal
    ///
    /// With `require_approval` the proposal is only attached to the report.
    pub fn remediate(&self, proposal: Contract, require_approval: bool) -> StageOutcome<RemediationOutcome> {
        if require_approval {
            tracing::info!(
                dataset = %proposal.dataset_id,
                version = proposal.version,
                "contract proposal pending approval"
            );
            return StageOutcome::Continue(RemediationOutcome::PendingApproval { proposal });
        }

        match self.apply(proposal) {
            Ok(applied) => StageOutcome::Continue(RemediationOutcome::Applied {
                version: applied.version,
                backup: applied
                    .backup
                    .map(|b| b.location)
                    .unwrap_or_default(),
            }),
            Err(StageError::RemediationGateFailure { gate, reason }) => {
                let err = StageError::gate(gate, reason.clone());
                StageOutcome::Warn(
                    RemediationOutcome::Rejected { gate, reason },
                    vec![err.to_string()],
                )
            }
            Err(err) => StageOutcome::Warn(
                RemediationOutcome::Rejected {
                    gate: SafetyGate::Revalidation,
                    reason: err.to_string(),
                },
                vec![err.to_string()],
            ),
        }
    }

    /// Write a proposal as the new active version once every gate passes
    pub fn apply(&self, mut proposal: Contract) -> Result<AppliedContract, StageError> {
        let dataset_id = proposal.dataset_id.clone();
        let lock = self.lock_for(&dataset_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| StageError::input(format!("contract lock for '{}' poisoned", dataset_id)))?;

        // Re-read under the lock; another writer may have moved the version
        let current = match self.repository.get(&dataset_id) {
            Ok(contract) => Some(contract),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(StageError::input(e.to_string())),
        };

        if let Some(current) = &current {
            let kept: HashSet<String> = proposal.columns.iter().map(ColumnSpec::normalized_name).collect();
            let removed: Vec<&str> = current
                .columns
                .iter()
                .filter(|c| !kept.contains(&c.normalized_name()))
                .map(|c| c.name.as_str())
                .collect();
            if !removed.is_empty() {
                return Err(self.reject(
                    SafetyGate::NoColumnRemoved,
                    format!("proposal removes column(s): {}", removed.join(", ")),
                ));
            }
        }

        if let Err(e) = proposal.validate() {
            return Err(self.reject(SafetyGate::Revalidation, e.to_string()));
        }
        if let Some(current) = &current {
            if proposal.version <= current.version {
                return Err(self.reject(
                    SafetyGate::Revalidation,
                    format!(
                        "proposed version {} does not supersede active version {}",
                        proposal.version, current.version
                    ),
                ));
            }
        }

        let backup = match &current {
            Some(_) => match self.repository.backup(&dataset_id) {
                Ok(backup) => Some(backup),
                Err(e) => return Err(self.reject(SafetyGate::Backup, e.to_string())),
            },
            None => None,
        };

        proposal.lifecycle.status = LifecycleStatus::Active;
        proposal.lifecycle.created_at = Some(Utc::now());
        let version = self.repository.put(&proposal).map_err(|e| match e {
            RepositoryError::VersionConflict { .. } | RepositoryError::Invalid(_) => {
                self.reject(SafetyGate::Revalidation, e.to_string())
            }
            other => StageError::input(other.to_string()),
        })?;

        tracing::info!(
            dataset = %dataset_id,
            version,
            backup = backup.as_ref().map(|b| b.location.as_str()).unwrap_or("none"),
            "contract version applied"
        );
        Ok(AppliedContract { version, backup })
    }

    /// Apply a human-approved contract document
    pub fn approve(&self, dataset_id: &str, content: &str) -> ApprovalResult {
        let proposal = match Contract::from_toml(content) {
            Ok(contract) => contract,
            Err(e) => return ApprovalResult::rejected(e.to_string()),
        };
        if proposal.dataset_id != dataset_id {
            return ApprovalResult::rejected(format!(
                "contract is for dataset '{}', not '{}'",
                proposal.dataset_id, dataset_id
            ));
        }

        match self.apply(proposal) {
            Ok(applied) => ApprovalResult::accepted(applied.version),
            Err(e) => ApprovalResult::rejected(e.to_string()),
        }
    }

    fn lock_for(&self, dataset_id: &str) -> Result<Arc<Mutex<()>>, StageError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StageError::input("contract lock table poisoned"))?;
        Ok(locks
            .entry(dataset_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn reject(&self, gate: SafetyGate, reason: String) -> StageError {
        tracing::warn!(%gate, %reason, "remediation gate failed");
        StageError::gate(gate, reason)
    }
}

impl std::fmt::Debug for RemediationActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationActuator").finish_non_exhaustive()
    }
}

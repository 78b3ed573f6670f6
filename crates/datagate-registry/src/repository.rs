//! Contract repository trait and in-memory implementation

use chrono::{DateTime, Utc};
use datagate_core::{Contract, LifecycleStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::RepositoryError;

/// Locator of an archived contract version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractVersionRef {
    pub dataset_id: String,
    pub version: u32,
    pub archived_at: DateTime<Utc>,

    /// Where the backup lives (a path for file repositories)
    pub location: String,
}

/// Versioned contract storage
///
/// Persisted versions are immutable: a change is always a new, higher
/// version. Backups are snapshots of the active version and are the source
/// for `restore`.
pub trait ContractRepository: Send + Sync {
    /// Active version of a dataset's contract
    fn get(&self, dataset_id: &str) -> Result<Contract, RepositoryError>;

    /// Publish a new active version, returning its version number
    ///
    /// Fails with `VersionConflict` unless the version is greater than the
    /// active one.
    fn put(&self, contract: &Contract) -> Result<u32, RepositoryError>;

    /// Archived versions, oldest first
    fn history(&self, dataset_id: &str) -> Result<Vec<ContractVersionRef>, RepositoryError>;

    /// Archive the active version
    fn backup(&self, dataset_id: &str) -> Result<ContractVersionRef, RepositoryError>;

    /// Most recent archived copy of a version
    fn archived(&self, dataset_id: &str, version: u32) -> Result<Contract, RepositoryError>;

    /// Re-publish an archived version as a new version
    fn restore(&self, dataset_id: &str, version: u32) -> Result<u32, RepositoryError> {
        let mut restored = self.archived(dataset_id, version)?;
        let current = self.get(dataset_id)?;
        self.backup(dataset_id)?;

        restored.version = current.version + 1;
        restored.lifecycle.status = LifecycleStatus::Active;
        restored.lifecycle.created_at = Some(Utc::now());
        tracing::info!(
            dataset = dataset_id,
            from = version,
            to = restored.version,
            "restoring archived contract"
        );
        self.put(&restored)
    }
}

/// Check a proposed version against the active one
pub(crate) fn check_version(
    contract: &Contract,
    active: Option<&Contract>,
) -> Result<(), RepositoryError> {
    contract.validate()?;
    if let Some(active) = active {
        if contract.version <= active.version {
            return Err(RepositoryError::VersionConflict {
                dataset_id: contract.dataset_id.clone(),
                current: active.version,
                proposed: contract.version,
            });
        }
    }
    Ok(())
}

type Archive = Vec<(ContractVersionRef, Contract)>;

/// Contract repository held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryContractRepository {
    active: Arc<RwLock<HashMap<String, Contract>>>,
    archive: Arc<RwLock<HashMap<String, Archive>>>,
}

impl InMemoryContractRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository seeded with contracts
    pub fn with_contracts(contracts: impl IntoIterator<Item = Contract>) -> Self {
        let repo = Self::new();
        if let Ok(mut active) = repo.active.write() {
            for contract in contracts {
                active.insert(contract.dataset_id.clone(), contract);
            }
        }
        repo
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Io("repository lock poisoned".to_string())
}

impl ContractRepository for InMemoryContractRepository {
    fn get(&self, dataset_id: &str) -> Result<Contract, RepositoryError> {
        let active = self.active.read().map_err(|_| poisoned())?;
        active
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(dataset_id.to_string()))
    }

    fn put(&self, contract: &Contract) -> Result<u32, RepositoryError> {
        let mut active = self.active.write().map_err(|_| poisoned())?;
        check_version(contract, active.get(&contract.dataset_id))?;
        active.insert(contract.dataset_id.clone(), contract.clone());
        Ok(contract.version)
    }

    fn history(&self, dataset_id: &str) -> Result<Vec<ContractVersionRef>, RepositoryError> {
        let archive = self.archive.read().map_err(|_| poisoned())?;
        Ok(archive
            .get(dataset_id)
            .map(|entries| entries.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default())
    }

    fn backup(&self, dataset_id: &str) -> Result<ContractVersionRef, RepositoryError> {
        let contract = self.get(dataset_id)?;
        let archived_at = Utc::now();
        let reference = ContractVersionRef {
            dataset_id: dataset_id.to_string(),
            version: contract.version,
            archived_at,
            location: format!("memory://{}/v{}/{}", dataset_id, contract.version, archived_at.to_rfc3339()),
        };

        let mut archive = self.archive.write().map_err(|_| poisoned())?;
        archive
            .entry(dataset_id.to_string())
            .or_default()
            .push((reference.clone(), contract));
        Ok(reference)
    }

    fn archived(&self, dataset_id: &str, version: u32) -> Result<Contract, RepositoryError> {
        let archive = self.archive.read().map_err(|_| poisoned())?;
        archive
            .get(dataset_id)
            .and_then(|entries| entries.iter().rev().find(|(r, _)| r.version == version))
            .map(|(_, contract)| contract.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("{} v{}", dataset_id, version)))
    }
}

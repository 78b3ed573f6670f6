//! Contract storage, lineage and reference data
//!
//! This crate handles:
//! - Versioned contract storage with backup and restore
//! - Lineage lookups (criticality tiers, consumers, blast radius)
//! - Key sets of referenced datasets for referential checks

pub mod fs;
pub mod lineage;
pub mod reference;
pub mod repository;

pub use fs::FileContractRepository;
pub use lineage::{Consumer, InMemoryLineage, LineageEntry, LineageGraph};
pub use reference::{InMemoryReferenceSource, ReferenceSource};
pub use repository::{ContractRepository, ContractVersionRef, InMemoryContractRepository};

use datagate_core::ContractError;

/// Errors that can occur when reading or writing contracts
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("No contract for dataset '{0}'")]
    NotFound(String),

    #[error("Version conflict for '{dataset_id}': current {current}, proposed {proposed}")]
    VersionConflict {
        dataset_id: String,
        current: u32,
        proposed: u32,
    },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid contract: {0}")]
    Invalid(String),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ContractError> for RepositoryError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::Parse(msg) => Self::Parse(msg),
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Errors that can occur when loading lineage
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

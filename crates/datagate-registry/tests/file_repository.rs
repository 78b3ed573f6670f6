//! Directory-backed contract repository tests

use datagate_core::{ColumnSpec, ConstraintSet, Contract, LifecycleStatus, LogicalType, Severity};
use datagate_registry::{ContractRepository, FileContractRepository, RepositoryError};
use tempfile::TempDir;

fn orders(version: u32, extra: bool) -> Contract {
    let mut columns = vec![
        ColumnSpec::new("order_id", LogicalType::String, Severity::Critical)
            .with_constraints(ConstraintSet::new().not_null().unique()),
        ColumnSpec::new("amount", LogicalType::Float, Severity::Critical)
            .with_constraints(ConstraintSet::new().min(0.0)),
    ];
    if extra {
        columns.push(ColumnSpec::new("channel", LogicalType::String, Severity::Warning));
    }
    Contract::new("orders", version, columns)
}

#[test]
fn publish_and_read_back() {
    let dir = TempDir::new().unwrap();
    let repo = FileContractRepository::open(dir.path()).unwrap();

    assert!(repo.get("orders").unwrap_err().is_not_found());
    repo.put(&orders(1, false)).unwrap();

    let active = repo.get("orders").unwrap();
    assert_eq!(active, orders(1, false));
    assert!(dir.path().join("orders.toml").exists());
}

#[test]
fn stale_versions_conflict() {
    let dir = TempDir::new().unwrap();
    let repo = FileContractRepository::open(dir.path()).unwrap();
    repo.put(&orders(2, false)).unwrap();

    let err = repo.put(&orders(1, true)).unwrap_err();
    assert!(matches!(err, RepositoryError::VersionConflict { current: 2, proposed: 1, .. }));
}

#[test]
fn backup_history_and_restore() {
    let dir = TempDir::new().unwrap();
    let repo = FileContractRepository::open(dir.path()).unwrap();

    repo.put(&orders(1, false)).unwrap();
    let backup = repo.backup("orders").unwrap();
    assert!(std::path::Path::new(&backup.location).exists());

    repo.put(&orders(2, true)).unwrap();
    let history = repo.history("orders").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);

    let version = repo.restore("orders", 1).unwrap();
    assert_eq!(version, 3);

    let active = repo.get("orders").unwrap();
    assert_eq!(active.columns.len(), 2);
    assert_eq!(active.lifecycle.status, LifecycleStatus::Active);

    // restore archives the version it replaces
    let versions: Vec<u32> = repo.history("orders").unwrap().iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2]);
}

#[test]
fn corrupt_document_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let repo = FileContractRepository::open(dir.path()).unwrap();
    std::fs::write(dir.path().join("orders.toml"), "dataset_id = ").unwrap();

    assert!(matches!(repo.get("orders"), Err(RepositoryError::Parse(_))));
}

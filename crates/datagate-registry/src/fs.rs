//! Directory-backed contract repository
//!
//! Layout:
//! - `<dir>/<dataset_id>.toml` is the active version
//! - `<dir>/archive/<dataset_id>_v<version>_<timestamp>.toml` are backups

use chrono::{DateTime, NaiveDateTime, Utc};
use datagate_core::Contract;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::repository::{check_version, ContractRepository, ContractVersionRef};
use crate::RepositoryError;

const ARCHIVE_DIR: &str = "archive";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

/// Contract repository persisted as TOML documents
#[derive(Debug)]
pub struct FileContractRepository {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileContractRepository {
    /// Open (and create if needed) a contracts directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(ARCHIVE_DIR)).map_err(io_error)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn active_path(&self, dataset_id: &str) -> Result<PathBuf, RepositoryError> {
        check_dataset_id(dataset_id)?;
        Ok(self.dir.join(format!("{}.toml", dataset_id)))
    }

    fn read_contract(path: &Path) -> Result<Contract, RepositoryError> {
        let contents = fs::read_to_string(path).map_err(io_error)?;
        Contract::from_toml(&contents)
            .map_err(|e| RepositoryError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Write through a temporary file so readers never see a partial document
    fn write_atomic(path: &Path, contents: &str) -> Result<(), RepositoryError> {
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, contents).map_err(io_error)?;
        fs::rename(&tmp, path).map_err(io_error)
    }

    fn archive_entries(&self, dataset_id: &str) -> Result<Vec<ContractVersionRef>, RepositoryError> {
        check_dataset_id(dataset_id)?;
        let prefix = format!("{}_v", dataset_id);
        let mut entries = Vec::new();

        for entry in fs::read_dir(self.dir.join(ARCHIVE_DIR)).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(rest) = stem.strip_prefix(&prefix) else {
                continue;
            };
            let Some((version, stamp)) = rest.split_once('_') else {
                continue;
            };
            let (Ok(version), Some(archived_at)) = (version.parse::<u32>(), parse_stamp(stamp)) else {
                continue;
            };

            entries.push(ContractVersionRef {
                dataset_id: dataset_id.to_string(),
                version,
                archived_at,
                location: path.display().to_string(),
            });
        }

        entries.sort_by(|a, b| (a.archived_at, a.version).cmp(&(b.archived_at, b.version)));
        Ok(entries)
    }
}

impl ContractRepository for FileContractRepository {
    fn get(&self, dataset_id: &str) -> Result<Contract, RepositoryError> {
        let path = self.active_path(dataset_id)?;
        if !path.exists() {
            return Err(RepositoryError::NotFound(dataset_id.to_string()));
        }
        Self::read_contract(&path)
    }

    fn put(&self, contract: &Contract) -> Result<u32, RepositoryError> {
        let path = self.active_path(&contract.dataset_id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RepositoryError::Io("repository lock poisoned".to_string()))?;

        let active = match self.get(&contract.dataset_id) {
            Ok(active) => Some(active),
            Err(RepositoryError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        check_version(contract, active.as_ref())?;

        let toml = contract.to_toml()?;
        Self::write_atomic(&path, &toml)?;
        tracing::info!(dataset = %contract.dataset_id, version = contract.version, "published contract");
        Ok(contract.version)
    }

    fn history(&self, dataset_id: &str) -> Result<Vec<ContractVersionRef>, RepositoryError> {
        self.archive_entries(dataset_id)
    }

    fn backup(&self, dataset_id: &str) -> Result<ContractVersionRef, RepositoryError> {
        let contract = self.get(dataset_id)?;
        let archived_at = Utc::now();
        let path = self.dir.join(ARCHIVE_DIR).join(format!(
            "{}_v{}_{}.toml",
            dataset_id,
            contract.version,
            archived_at.format(STAMP_FORMAT)
        ));

        let toml = contract.to_toml()?;
        Self::write_atomic(&path, &toml)?;
        tracing::debug!(dataset = dataset_id, path = %path.display(), "archived contract");

        Ok(ContractVersionRef {
            dataset_id: dataset_id.to_string(),
            version: contract.version,
            archived_at,
            location: path.display().to_string(),
        })
    }

    fn archived(&self, dataset_id: &str, version: u32) -> Result<Contract, RepositoryError> {
        let entry = self
            .archive_entries(dataset_id)?
            .into_iter()
            .rev()
            .find(|r| r.version == version)
            .ok_or_else(|| RepositoryError::NotFound(format!("{} v{}", dataset_id, version)))?;
        Self::read_contract(Path::new(&entry.location))
    }
}

fn io_error(err: std::io::Error) -> RepositoryError {
    RepositoryError::Io(err.to_string())
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Dataset ids become file names
fn check_dataset_id(dataset_id: &str) -> Result<(), RepositoryError> {
    let valid = !dataset_id.is_empty()
        && dataset_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !dataset_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::Invalid(format!(
            "dataset id '{}' is not a valid file name",
            dataset_id
        )))
    }
}

//! Key sets of referenced datasets

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Supplies the keys of a referenced dataset column
pub trait ReferenceSource: Send + Sync {
    /// Known keys, or `None` when this source has no data for the column
    fn keys(&self, dataset_id: &str, column: &str) -> Option<HashSet<String>>;
}

/// Reference keys held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryReferenceSource {
    keys: Arc<RwLock<HashMap<(String, String), HashSet<String>>>>,
}

impl InMemoryReferenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the keys of `dataset_id.column`, replacing earlier ones
    pub fn insert<I, S>(&self, dataset_id: &str, column: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut map) = self.keys.write() {
            map.insert(
                (dataset_id.to_string(), column.to_string()),
                keys.into_iter().map(Into::into).collect(),
            );
        }
    }
}

impl ReferenceSource for InMemoryReferenceSource {
    fn keys(&self, dataset_id: &str, column: &str) -> Option<HashSet<String>> {
        self.keys
            .read()
            .ok()?
            .get(&(dataset_id.to_string(), column.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_registered_keys() {
        let source = InMemoryReferenceSource::new();
        source.insert("users", "user_id", ["u1", "u2"]);

        let keys = source.keys("users", "user_id").unwrap();
        assert!(keys.contains("u1"));
        assert_eq!(keys.len(), 2);
        assert!(source.keys("users", "email").is_none());
    }
}

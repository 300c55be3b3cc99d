use sled::Db;

use crate::local_store::{Storage, StorageError, StorageResult};

const TREE_NAME: &str = "local_storage";

/// A sled-backed implementation of `Storage` that survives restarts.
pub struct SledStorage {
    db: Db,
}

impl SledStorage {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &str) -> StorageResult<Self> {
        let db = sled::open(path)
            .map_err(|e| StorageError::Unavailable(format!("failed to open {path}: {e}")))?;
        Ok(Self { db })
    }

    fn tree(&self) -> StorageResult<sled::Tree> {
        self.db
            .open_tree(TREE_NAME)
            .map_err(|e| StorageError::Backend(format!("failed to open {TREE_NAME} tree: {e}")))
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let tree = self.tree()?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| StorageError::Backend(format!("non-utf8 value under {key}: {e}"))),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let tree = self.tree()?;
        tree.insert(key.as_bytes(), value.as_bytes())?;
        tree.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let tree = self.tree()?;
        tree.remove(key.as_bytes())?;
        tree.flush()?;
        Ok(())
    }
}

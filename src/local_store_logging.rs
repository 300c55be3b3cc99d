// Logging decorator for any Storage backend.
// Values are never logged verbatim; only their length and a short digest.

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::local_store::{Storage, StorageResult};

/// Wraps a `Storage` and traces every call.
pub struct LoggingStorage<S> {
    inner: S,
}

impl<S: Storage> LoggingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// First 8 bytes of the SHA-256 of `value`, hex encoded.
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

impl<S: Storage> Storage for LoggingStorage<S> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match self.inner.get(key) {
            Ok(Some(value)) => {
                debug!(key, len = value.len(), digest = %fingerprint(&value), "storage get");
                Ok(Some(value))
            }
            Ok(None) => {
                debug!(key, "storage get: absent");
                Ok(None)
            }
            Err(e) => {
                warn!(key, error = %e, "storage get failed");
                Err(e)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let result = self.inner.set(key, value);
        match &result {
            Ok(()) => debug!(key, len = value.len(), digest = %fingerprint(value), "storage set"),
            Err(e) => warn!(key, error = %e, "storage set failed"),
        }
        result
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let result = self.inner.remove(key);
        match &result {
            Ok(()) => debug!(key, "storage remove"),
            Err(e) => warn!(key, error = %e, "storage remove failed"),
        }
        result
    }
}

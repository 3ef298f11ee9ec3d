#![forbid(unsafe_code)]

mod error;
mod memory;
pub mod paths;
mod sqlite;

pub use error::StoreError;
pub use memory::{MemoryObjectStore, ObjectOp, RecordedOp};
pub use sqlite::SqliteObjectStore;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bucketed blob storage. Keys are `/`-separated paths; `list` returns keys sorted ascending.
pub trait ObjectStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), StoreError>;

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError>;

    /// Deleting a missing key is not an error.
    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

pub trait ObjectStoreExt: ObjectStore {
    fn get_text(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let bytes = self.get(bucket, key)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn get_json<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Result<T, StoreError> {
        let bytes = self.get(bucket, key)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `Ok(None)` when the key is absent.
    fn get_json_opt<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get_json(bucket, key) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn put_json<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(value)?;
        self.put(bucket, key, &body)
    }

    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self.get(bucket, key) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl<S: ObjectStore + ?Sized> ObjectStoreExt for S {}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#![forbid(unsafe_code)]

use crate::{ObjectStore, StoreError, validate_key};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectOp {
    Get,
    Put,
    List,
    Copy,
    Delete,
}

impl ObjectOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::List => "list",
            Self::Copy => "copy",
            Self::Delete => "delete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedOp {
    pub op: ObjectOp,
    pub bucket: String,
    /// Key, list prefix, or destination key for copies.
    pub key: String,
}

#[derive(Clone, Debug)]
struct Failure {
    op: ObjectOp,
    key_fragment: String,
    reason: String,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), Vec<u8>>,
    failures: Vec<Failure>,
    ops: Vec<RecordedOp>,
}

/// In-process object store that records every call and can be told to fail specific ones.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Makes every later `op` whose key contains `key_fragment` fail with a transport error.
    pub fn fail_on(&self, op: ObjectOp, key_fragment: &str, reason: &str) {
        if let Ok(mut state) = self.state() {
            state.failures.push(Failure {
                op,
                key_fragment: key_fragment.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state() {
            state.failures.clear();
        }
    }

    pub fn operations(&self) -> Vec<RecordedOp> {
        self.state().map(|s| s.ops.clone()).unwrap_or_default()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .map(|s| {
                s.objects
                    .keys()
                    .filter(|(b, _)| b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn begin(
        &self,
        op: ObjectOp,
        bucket: &str,
        key: &str,
    ) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self.state()?;
        state.ops.push(RecordedOp {
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let injected = state
            .failures
            .iter()
            .find(|f| f.op == op && key.contains(&f.key_fragment))
            .map(|f| f.reason.clone());
        if let Some(reason) = injected {
            return Err(StoreError::Transport {
                op: op.as_str(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason,
            });
        }
        Ok(state)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.begin(ObjectOp::Get, bucket, key)?;
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut state = self.begin(ObjectOp::Put, bucket, key)?;
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let state = self.begin(ObjectOp::List, bucket, prefix)?;
        Ok(state
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        validate_key(dst_key)?;
        let mut state = self.begin(ObjectOp::Copy, dst_bucket, dst_key)?;
        let body = state
            .objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(src_bucket, src_key))?;
        state
            .objects
            .insert((dst_bucket.to_string(), dst_key.to_string()), body);
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut state = self.begin(ObjectOp::Delete, bucket, key)?;
        state.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#![forbid(unsafe_code)]

use crate::QuantError;
use pq_core::dataset::Dataset;
use pq_storage::{ObjectStore, ObjectStoreExt, paths};
use std::sync::Arc;

pub trait DatasetReader: Send + Sync {
    fn read_dataset(&self, dataset_id: &str) -> Result<Dataset, QuantError>;
}

/// Reads `Scans/<dataset>/dataset-index.json` from the datasets bucket.
pub struct StoreDatasetReader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl StoreDatasetReader {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }
}

impl DatasetReader for StoreDatasetReader {
    fn read_dataset(&self, dataset_id: &str) -> Result<Dataset, QuantError> {
        let key = paths::dataset_index(dataset_id);
        match self.store.get_json::<Dataset>(&self.bucket, &key) {
            Ok(dataset) => Ok(dataset),
            Err(err) if err.is_not_found() => Err(QuantError::DependencyMissing(format!(
                "dataset {dataset_id} has no location index"
            ))),
            Err(err) => Err(err.into()),
        }
    }
}

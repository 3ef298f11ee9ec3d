#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),
    #[error("{op} failed for {bucket}/{key}: {reason}")]
    Transport {
        op: &'static str,
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("object store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

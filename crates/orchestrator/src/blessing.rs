#![forbid(unsafe_code)]

//! Blessing and publication ledgers: append-only, versioned lists per dataset.
//!
//! Both are read-modify-write without locking, so concurrent writers can lose an entry or
//! leave a version gap. Reads tolerate gaps; [`audit_versions`] reports them.

use crate::QuantError;
use crate::sharing::share_quant;
use pq_core::JobId;
use pq_core::model::UserInfo;
use pq_storage::{ObjectStore, ObjectStoreExt, paths};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlessEntry {
    pub version: u32,
    pub blessed_at: i64,
    pub user_id: String,
    pub user_name: String,
    pub job_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlessFile {
    #[serde(default)]
    pub history: Vec<BlessEntry>,
}

impl BlessFile {
    /// Highest version wins.
    pub fn current(&self) -> Option<&BlessEntry> {
        self.history.iter().max_by_key(|entry| entry.version)
    }

    pub fn next_version(&self) -> u32 {
        self.history.iter().map(|e| e.version).max().unwrap_or(0) + 1
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Publication {
    pub version: u32,
    pub published_at: i64,
    pub job_id: String,
    pub publisher: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationLedger {
    #[serde(default)]
    pub publications: Vec<Publication>,
}

pub fn read_bless_file(
    store: &dyn ObjectStore,
    bucket: &str,
    dataset_id: &str,
) -> Result<BlessFile, QuantError> {
    Ok(store
        .get_json_opt(bucket, &paths::blessed_file(dataset_id))?
        .unwrap_or_default())
}

/// Endorses a quant as the dataset's reference. A bare id is shared from `owner`'s scope
/// first; a `shared-` id must already be shared.
pub fn bless_quant(
    store: &dyn ObjectStore,
    bucket: &str,
    dataset_id: &str,
    scoped_job_id: &str,
    owner: &str,
    endorser: &UserInfo,
    now_unix_sec: i64,
) -> Result<BlessEntry, QuantError> {
    let (job_id, already_shared) = JobId::parse_scoped(scoped_job_id)?;
    if !already_shared {
        share_quant(store, bucket, owner, dataset_id, &job_id)?;
    }
    let shared_summary = paths::quant_summary(paths::SHARED_OWNER, dataset_id, &job_id);
    if !store.exists(bucket, &shared_summary)? {
        return Err(QuantError::NotFound(format!(
            "no shared quantification {job_id} for dataset {dataset_id}"
        )));
    }

    let mut ledger = read_bless_file(store, bucket, dataset_id)?;
    let entry = BlessEntry {
        version: ledger.next_version(),
        blessed_at: now_unix_sec,
        user_id: endorser.user_id.clone(),
        user_name: endorser.name.clone(),
        job_id: job_id.to_string(),
    };
    ledger.history.push(entry.clone());
    store.put_json(bucket, &paths::blessed_file(dataset_id), &ledger)?;
    tracing::info!(
        dataset = %dataset_id,
        job_id = %job_id,
        version = entry.version,
        user_id = %endorser.user_id,
        "quantification blessed"
    );
    Ok(entry)
}

pub fn read_publications(
    store: &dyn ObjectStore,
    bucket: &str,
    dataset_id: &str,
) -> Result<PublicationLedger, QuantError> {
    Ok(store
        .get_json_opt(bucket, &paths::publications_file(dataset_id))?
        .unwrap_or_default())
}

/// Appends a publication of an already shared quant.
pub fn publish_quant(
    store: &dyn ObjectStore,
    bucket: &str,
    dataset_id: &str,
    job_id: &JobId,
    publisher: &str,
    now_unix_sec: i64,
) -> Result<Publication, QuantError> {
    let shared_summary = paths::quant_summary(paths::SHARED_OWNER, dataset_id, job_id);
    if !store.exists(bucket, &shared_summary)? {
        return Err(QuantError::NotFound(format!(
            "quantification {job_id} must be shared before publishing"
        )));
    }
    let mut ledger = read_publications(store, bucket, dataset_id)?;
    let version = ledger
        .publications
        .iter()
        .map(|p| p.version)
        .max()
        .unwrap_or(0)
        + 1;
    let publication = Publication {
        version,
        published_at: now_unix_sec,
        job_id: job_id.to_string(),
        publisher: publisher.to_string(),
    };
    ledger.publications.push(publication.clone());
    store.put_json(bucket, &paths::publications_file(dataset_id), &ledger)?;
    tracing::info!(dataset = %dataset_id, job_id = %job_id, version, "quantification published");
    Ok(publication)
}

/// Problems with a version sequence: anything other than exactly `1..=n` in order.
pub fn audit_versions(versions: &[u32]) -> Vec<String> {
    let mut issues = Vec::new();
    let mut expected = 1;
    for (idx, &version) in versions.iter().enumerate() {
        if version != expected {
            if version > expected {
                issues.push(format!(
                    "entry {idx}: version {version} leaves a gap after {}",
                    expected - 1
                ));
            } else {
                issues.push(format!(
                    "entry {idx}: version {version} does not increase past {}",
                    expected - 1
                ));
            }
        }
        expected = version.max(expected - 1) + 1;
    }
    issues
}

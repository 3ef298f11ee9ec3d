#![forbid(unsafe_code)]

use crate::QuantError;
use pq_core::JobId;
use pq_core::model::JobSummary;
use pq_storage::{ObjectStore, ObjectStoreExt, paths};

/// Copies binary and CSV from the owner's scope into the shared scope, then writes the summary
/// there with `shared` set. Re-sharing overwrites the shared copies; the owner's files are left
/// in place.
pub fn share_quant(
    store: &dyn ObjectStore,
    bucket: &str,
    owner: &str,
    dataset_id: &str,
    job_id: &JobId,
) -> Result<(), QuantError> {
    let Some(mut summary) =
        store.get_json_opt::<JobSummary>(bucket, &paths::quant_summary(owner, dataset_id, job_id))?
    else {
        return Err(QuantError::DependencyMissing(format!(
            "no quantification {job_id} for dataset {dataset_id}"
        )));
    };

    let shared = paths::SHARED_OWNER;
    let copies = [
        (
            paths::quant_bin(owner, dataset_id, job_id),
            paths::quant_bin(shared, dataset_id, job_id),
        ),
        (
            paths::quant_csv(owner, dataset_id, job_id),
            paths::quant_csv(shared, dataset_id, job_id),
        ),
    ];
    for (src, dst) in &copies {
        store.copy(bucket, src, bucket, dst)?;
    }
    summary.shared = true;
    store.put_json(
        bucket,
        &paths::quant_summary(shared, dataset_id, job_id),
        &summary,
    )?;
    tracing::info!(job_id = %job_id, dataset = %dataset_id, owner = %owner, "quantification shared");
    Ok(())
}

#![forbid(unsafe_code)]

use crate::QuantError;
use crate::status::read_dataset_map;
use pq_core::model::{JobPhase, JobSummary};
use pq_storage::{ObjectStore, ObjectStoreExt, paths};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether `owner` already has a finished or in-flight quant on `dataset_id` named `name`.
///
/// Both lookups run concurrently and stop once either finds a match. The answer is advisory:
/// nothing stops a job with the same name being created after this returns.
pub fn is_name_taken(
    store: &dyn ObjectStore,
    users_bucket: &str,
    jobs_bucket: &str,
    owner: &str,
    dataset_id: &str,
    name: &str,
) -> Result<bool, QuantError> {
    let found = AtomicBool::new(false);
    let failures: Mutex<Vec<QuantError>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        scope.spawn(|| {
            if let Err(err) = check_summaries(store, users_bucket, owner, dataset_id, name, &found)
            {
                record(&failures, err);
            }
        });
        scope.spawn(|| {
            if let Err(err) = check_in_flight(store, jobs_bucket, owner, dataset_id, name, &found) {
                record(&failures, err);
            }
        });
    });

    if found.load(Ordering::SeqCst) {
        return Ok(true);
    }
    let mut failures = failures
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if failures.is_empty() {
        Ok(false)
    } else {
        Err(failures.remove(0))
    }
}

fn record(failures: &Mutex<Vec<QuantError>>, err: QuantError) {
    match failures.lock() {
        Ok(mut guard) => guard.push(err),
        Err(poisoned) => poisoned.into_inner().push(err),
    }
}

fn check_summaries(
    store: &dyn ObjectStore,
    bucket: &str,
    owner: &str,
    dataset_id: &str,
    name: &str,
    found: &AtomicBool,
) -> Result<(), QuantError> {
    let keys = store.list(bucket, &paths::summary_prefix(owner, dataset_id))?;
    for key in keys {
        if found.load(Ordering::SeqCst) {
            return Ok(());
        }
        let summary: JobSummary = match store.get_json(bucket, &key) {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "skipping unreadable summary in name check");
                continue;
            }
        };
        if summary.name() == name {
            found.store(true, Ordering::SeqCst);
            return Ok(());
        }
    }
    Ok(())
}

fn check_in_flight(
    store: &dyn ObjectStore,
    bucket: &str,
    owner: &str,
    dataset_id: &str,
    name: &str,
    found: &AtomicBool,
) -> Result<(), QuantError> {
    let map = read_dataset_map(store, bucket, dataset_id)?;
    let taken = map.values().any(|summary| {
        summary.status.status != JobPhase::Complete
            && summary.creator_id() == owner
            && summary.name() == name
    });
    if taken {
        found.store(true, Ordering::SeqCst);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DatasetJobMap;
    use pq_core::JobId;
    use pq_core::model::{JobParameters, JobParamsWithPointCount, JobStatus, UserInfo};
    use pq_storage::MemoryObjectStore;

    fn summary(owner: &str, name: &str, job_id: &str, phase: JobPhase) -> JobSummary {
        JobSummary {
            shared: false,
            params: JobParamsWithPointCount {
                pmcs_count: 1,
                params: JobParameters {
                    name: name.to_string(),
                    dataset_id: "D".to_string(),
                    dataset_path: String::new(),
                    detector_config: "PIXL/v5".to_string(),
                    elements: vec!["Fe".to_string()],
                    parameters: String::new(),
                    run_time_sec: 60,
                    cores_per_node: 6,
                    start_unix_time: 0,
                    creator: UserInfo {
                        user_id: owner.to_string(),
                        ..UserInfo::default()
                    },
                    roi_ids: Vec::new(),
                    element_set_id: String::new(),
                    piquant_version: "3.2.8".to_string(),
                    quant_mode: pq_core::model::QuantMode::CombinedDetector,
                    comments: String::new(),
                    include_dwells: false,
                    command: Default::default(),
                },
            },
            elements: Vec::new(),
            status: JobStatus {
                status: phase,
                ..JobStatus::starting(JobId::try_new(job_id).expect("id"), "quants/U/D")
            },
        }
    }

    #[test]
    fn finished_and_in_flight_names_are_both_taken() {
        let store = MemoryObjectStore::new();
        store
            .put_json(
                "users",
                "quants/U/D/summary-jx.json",
                &summary("U", "X", "jx", JobPhase::Complete),
            )
            .expect("seed summary");
        let mut map = DatasetJobMap::new();
        map.insert(
            "jy".to_string(),
            summary("U", "Y", "jy", JobPhase::Aggregating),
        );
        store
            .put_json("jobs", "job-status/D.json", &map)
            .expect("seed map");

        let taken = |name: &str| {
            is_name_taken(&store, "users", "jobs", "U", "D", name).expect("name check")
        };
        assert!(taken("X"));
        assert!(taken("Y"));
        assert!(!taken("Z"));
    }

    #[test]
    fn lookup_failures_surface_when_nothing_matched() {
        let store = MemoryObjectStore::new();
        store.fail_on(pq_storage::ObjectOp::List, "quants/U/D/", "unreachable");
        let err = is_name_taken(&store, "users", "jobs", "U", "D", "X").expect_err("list failed");
        assert_eq!(err.kind(), crate::ErrorKind::Transport);
    }
}

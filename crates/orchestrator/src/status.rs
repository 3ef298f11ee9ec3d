#![forbid(unsafe_code)]

//! Per-job status documents and the per-dataset in-flight map.

use crate::QuantError;
use crate::clock::Clock;
use pq_core::JobId;
use pq_core::model::{JobPhase, JobStartingParameters, JobStatus, JobSummary};
use pq_storage::{ObjectStore, ObjectStoreExt, paths};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Completed jobs stay in the in-flight map this long after finishing.
pub const COMPLETED_VISIBLE_SECS: i64 = 600;

/// Slack on top of the engine runtime limit before an unfinished job counts as abandoned.
pub const STALE_GRACE_SECS: i64 = 600;

/// Age after which a job still short of a terminal phase is failed by [`rebuild_dataset_map`].
pub fn stale_after_secs(max_runtime_seconds: u64) -> i64 {
    i64::try_from(max_runtime_seconds)
        .unwrap_or(i64::MAX)
        .saturating_add(STALE_GRACE_SECS)
}

/// Job id -> summary, as stored at `job-status/<dataset>.json`.
pub type DatasetJobMap = BTreeMap<String, JobSummary>;

/// Writer of one job's `status.json` while its driver runs. Phases only move forward, `Error`
/// is reachable from any non-terminal phase, and nothing follows a terminal phase.
pub struct JobStatusTracker {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    clock: Arc<dyn Clock>,
    dataset_id: String,
    status: JobStatus,
}

impl JobStatusTracker {
    /// Writes the initial `Starting` status.
    pub fn start(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        clock: Arc<dyn Clock>,
        dataset_id: impl Into<String>,
        status: JobStatus,
    ) -> Result<Self, QuantError> {
        let tracker = Self::resume(store, bucket, clock, dataset_id, status);
        tracker.persist(&tracker.status)?;
        Ok(tracker)
    }

    /// Picks up a job whose status is already stored, without writing.
    pub fn resume(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        clock: Arc<dyn Clock>,
        dataset_id: impl Into<String>,
        status: JobStatus,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            clock,
            dataset_id: dataset_id.into(),
            status,
        }
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn job_id(&self) -> &JobId {
        &self.status.job_id
    }

    /// The status `phase` would produce, without writing it.
    pub fn next_status(&self, phase: JobPhase, message: &str) -> Result<JobStatus, QuantError> {
        let from = self.status.status;
        if !from.can_advance_to(phase) {
            return Err(QuantError::Validation(format!(
                "job {}: cannot move from {} to {}",
                self.status.job_id,
                from.as_str(),
                phase.as_str()
            )));
        }
        let mut next = self.status.clone();
        next.status = phase;
        next.message = message.to_string();
        if phase.is_terminal() {
            next.end_unix_time = self.clock.now_unix_sec();
        }
        Ok(next)
    }

    /// Persists a status obtained from [`Self::next_status`].
    pub fn commit(&mut self, next: JobStatus) -> Result<(), QuantError> {
        if !self.status.status.can_advance_to(next.status) {
            return Err(QuantError::Validation(format!(
                "job {}: cannot move from {} to {}",
                self.status.job_id,
                self.status.status.as_str(),
                next.status.as_str()
            )));
        }
        self.persist(&next)?;
        tracing::info!(
            job_id = %next.job_id,
            dataset = %self.dataset_id,
            phase = next.status.as_str(),
            message = %next.message,
            "job status"
        );
        self.status = next;
        Ok(())
    }

    pub fn advance(&mut self, phase: JobPhase, message: &str) -> Result<(), QuantError> {
        let next = self.next_status(phase, message)?;
        self.commit(next)
    }

    /// Recorded with the next phase write.
    pub fn set_logs(&mut self, logs: Vec<String>) {
        self.status.piquant_log_list = logs;
    }

    /// Moves to `Error` unless already terminal; returns the final status either way.
    pub fn fail(&mut self, message: &str) -> Result<JobStatus, QuantError> {
        if !self.status.status.is_terminal() {
            self.advance(JobPhase::Error, message)?;
        }
        Ok(self.status.clone())
    }

    fn persist(&self, status: &JobStatus) -> Result<(), QuantError> {
        let key = paths::job_status(&self.dataset_id, &status.job_id);
        self.store.put_json(&self.bucket, &key, status)?;
        Ok(())
    }
}

pub fn read_job_status(
    store: &dyn ObjectStore,
    bucket: &str,
    dataset_id: &str,
    job_id: &JobId,
) -> Result<Option<JobStatus>, QuantError> {
    Ok(store.get_json_opt(bucket, &paths::job_status(dataset_id, job_id))?)
}

/// Empty when no map has been written yet.
pub fn read_dataset_map(
    store: &dyn ObjectStore,
    bucket: &str,
    dataset_id: &str,
) -> Result<DatasetJobMap, QuantError> {
    Ok(store
        .get_json_opt(bucket, &paths::job_status_map(dataset_id))?
        .unwrap_or_default())
}

/// Scans every job of a dataset, joins status with params, and rewrites the in-flight map.
/// Jobs started more than `stale_after_secs` ago that never reached a terminal phase are moved
/// to `Error` first.
pub fn rebuild_dataset_map(
    store: &dyn ObjectStore,
    bucket: &str,
    dataset_id: &str,
    now_unix_sec: i64,
    stale_after_secs: i64,
) -> Result<DatasetJobMap, QuantError> {
    let keys = store.list(bucket, &paths::jobs_prefix(dataset_id))?;
    let mut map = DatasetJobMap::new();

    for key in &keys {
        let Some(raw_id) = paths::job_id_from_status_key(dataset_id, key) else {
            continue;
        };
        let Ok(job_id) = JobId::try_new(raw_id) else {
            tracing::warn!(dataset = %dataset_id, key = %key, "skipping malformed job id");
            continue;
        };
        let mut status: JobStatus = match store.get_json(bucket, key) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(dataset = %dataset_id, job_id = %job_id, error = %err, "unreadable job status");
                continue;
            }
        };
        if status.status == JobPhase::Complete
            && now_unix_sec - status.end_unix_time > COMPLETED_VISIBLE_SECS
        {
            continue;
        }
        let params: JobStartingParameters =
            match store.get_json(bucket, &paths::job_params(dataset_id, &job_id)) {
                Ok(params) => params,
                Err(err) => {
                    tracing::warn!(dataset = %dataset_id, job_id = %job_id, error = %err, "unreadable job params");
                    continue;
                }
            };
        let age = now_unix_sec - params.params.start_unix_time;
        if !status.status.is_terminal() && age > stale_after_secs {
            tracing::warn!(
                dataset = %dataset_id,
                job_id = %job_id,
                phase = status.status.as_str(),
                age_secs = age,
                "failing abandoned job"
            );
            status.message = format!(
                "job stopped in phase {} with no progress for {age}s",
                status.status.as_str()
            );
            status.status = JobPhase::Error;
            status.end_unix_time = now_unix_sec;
            store.put_json(bucket, key, &status)?;
        }
        map.insert(
            job_id.to_string(),
            JobSummary {
                shared: false,
                params: params.with_point_count(),
                elements: params.params.elements.clone(),
                status,
            },
        );
    }

    store.put_json(bucket, &paths::job_status_map(dataset_id), &map)?;
    tracing::debug!(dataset = %dataset_id, jobs = map.len(), "rebuilt job status map");
    Ok(map)
}

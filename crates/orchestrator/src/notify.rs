#![forbid(unsafe_code)]

use crate::clock::format_unix;
use pq_core::model::{JobStatus, JobSummary, UserInfo};

/// Delivery of job outcome messages to the requesting user.
pub trait Notifier: Send + Sync {
    fn job_complete(&self, user: &UserInfo, summary: &JobSummary);

    fn job_failed(&self, user: &UserInfo, job_name: &str, status: &JobStatus);
}

/// Writes notifications to the log only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn job_complete(&self, user: &UserInfo, summary: &JobSummary) {
        tracing::info!(
            user_id = %user.user_id,
            job_id = %summary.job_id(),
            name = %summary.name(),
            finished_at = %format_unix(summary.status.end_unix_time),
            "quantification complete"
        );
    }

    fn job_failed(&self, user: &UserInfo, job_name: &str, status: &JobStatus) {
        tracing::warn!(
            user_id = %user.user_id,
            job_id = %status.job_id,
            name = %job_name,
            finished_at = %format_unix(status.end_unix_time),
            message = %status.message,
            "quantification failed"
        );
    }
}

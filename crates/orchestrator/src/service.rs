#![forbid(unsafe_code)]

use crate::QuantError;
use crate::blessing::{
    BlessEntry, BlessFile, Publication, audit_versions, bless_quant, publish_quant,
    read_bless_file,
};
use crate::context::QuantContext;
use crate::driver::{StartedJob, create_job};
use crate::naming::is_name_taken;
use crate::sharing::share_quant;
use crate::status::{DatasetJobMap, rebuild_dataset_map, stale_after_secs};
use pq_core::convert::decode_quantification;
use pq_core::model::{
    EngineCommand, JobCreateRequest, JobParameters, JobPhase, JobStartingParameters, JobStatus,
    JobSummary, QuantMode, UserInfo,
};
use pq_core::{ConvertOptions, JobId, convert_quant_csv};
use pq_storage::{ObjectStoreExt, paths};
use serde::Serialize;
use std::collections::HashSet;

/// One row of a job listing. `id` carries the `shared-` prefix for shared quants.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListing {
    pub id: String,
    pub summary: JobSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlessedView {
    pub history: Vec<BlessEntry>,
    pub bless_item: Option<BlessEntry>,
    /// Version sequence problems; empty for a clean ledger.
    pub issues: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LastOutput {
    Csv,
    Log,
}

/// User-facing quantification operations.
#[derive(Clone)]
pub struct QuantService {
    ctx: QuantContext,
}

impl QuantService {
    pub fn new(ctx: QuantContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &QuantContext {
        &self.ctx
    }

    pub fn create_job(
        &self,
        request: JobCreateRequest,
        creator: UserInfo,
    ) -> Result<StartedJob, QuantError> {
        create_job(&self.ctx, request, creator)
    }

    /// Owner and shared summaries plus the owner's unfinished jobs, newest first.
    pub fn list_jobs(
        &self,
        owner: &str,
        dataset_id: &str,
    ) -> Result<Vec<JobListing>, QuantError> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();

        for summary in self.read_summaries(owner, dataset_id)? {
            seen.insert(summary.job_id().to_string());
            out.push(JobListing {
                id: summary.job_id().to_string(),
                summary,
            });
        }
        for mut summary in self.read_summaries(paths::SHARED_OWNER, dataset_id)? {
            summary.shared = true;
            out.push(JobListing {
                id: summary.job_id().shared_display(),
                summary,
            });
        }

        let in_flight = crate::status::read_dataset_map(
            self.ctx.store.as_ref(),
            self.ctx.jobs_bucket(),
            dataset_id,
        )?;
        for (id, summary) in in_flight {
            if summary.status.status != JobPhase::Complete
                && summary.creator_id() == owner
                && !seen.contains(&id)
            {
                out.push(JobListing { id, summary });
            }
        }

        out.sort_by(|a, b| {
            b.summary
                .params
                .params
                .start_unix_time
                .cmp(&a.summary.params.params.start_unix_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    fn read_summaries(
        &self,
        owner: &str,
        dataset_id: &str,
    ) -> Result<Vec<JobSummary>, QuantError> {
        let bucket = self.ctx.users_bucket();
        let keys = self
            .ctx
            .store
            .list(bucket, &paths::summary_prefix(owner, dataset_id))?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if paths::job_id_from_summary_key(&key).is_none() {
                continue;
            }
            match self.ctx.store.get_json::<JobSummary>(bucket, &key) {
                Ok(summary) => out.push(summary),
                Err(err) => tracing::warn!(key = %key, error = %err, "skipping unreadable summary"),
            }
        }
        Ok(out)
    }

    /// Honours the `shared-` prefix.
    pub fn get_summary(
        &self,
        owner: &str,
        dataset_id: &str,
        scoped_id: &str,
    ) -> Result<JobSummary, QuantError> {
        let (job_id, shared) = JobId::parse_scoped(scoped_id)?;
        let scope = if shared { paths::SHARED_OWNER } else { owner };
        let key = paths::quant_summary(scope, dataset_id, &job_id);
        let mut summary: JobSummary = self
            .ctx
            .store
            .get_json_opt(self.ctx.users_bucket(), &key)?
            .ok_or_else(|| QuantError::NotFound(format!("quantification {scoped_id} not found")))?;
        summary.shared = shared;
        Ok(summary)
    }

    /// Removes summary, binary, CSV and collected logs. Shared quants may only be deleted by
    /// their creator.
    pub fn delete_job(
        &self,
        owner: &str,
        dataset_id: &str,
        scoped_id: &str,
    ) -> Result<(), QuantError> {
        let (job_id, shared) = JobId::parse_scoped(scoped_id)?;
        let summary = self.get_summary(owner, dataset_id, scoped_id)?;
        if shared && summary.creator_id() != owner {
            return Err(QuantError::Forbidden(format!(
                "{scoped_id} was shared by another user"
            )));
        }

        let scope = if shared { paths::SHARED_OWNER } else { owner };
        let bucket = self.ctx.users_bucket();
        let store = &self.ctx.store;
        let mut keys = vec![
            paths::quant_summary(scope, dataset_id, &job_id),
            paths::quant_bin(scope, dataset_id, &job_id),
            paths::quant_csv(scope, dataset_id, &job_id),
        ];
        keys.extend(store.list(bucket, &paths::quant_log_dir(scope, dataset_id, &job_id))?);
        for key in &keys {
            store.delete(bucket, key)?;
        }
        tracing::info!(job_id = %job_id, dataset = %dataset_id, shared, "quantification deleted");
        Ok(())
    }

    pub fn share(&self, owner: &str, dataset_id: &str, job_id: &str) -> Result<(), QuantError> {
        let (job_id, shared) = JobId::parse_scoped(job_id)?;
        if shared {
            return Err(QuantError::Validation(format!(
                "{} is already shared",
                job_id.shared_display()
            )));
        }
        share_quant(
            self.ctx.store.as_ref(),
            self.ctx.users_bucket(),
            owner,
            dataset_id,
            &job_id,
        )
    }

    pub fn bless(
        &self,
        endorser: &UserInfo,
        dataset_id: &str,
        scoped_id: &str,
    ) -> Result<BlessEntry, QuantError> {
        bless_quant(
            self.ctx.store.as_ref(),
            self.ctx.users_bucket(),
            dataset_id,
            scoped_id,
            &endorser.user_id,
            endorser,
            self.ctx.now(),
        )
    }

    pub fn blessed(&self, dataset_id: &str) -> Result<BlessedView, QuantError> {
        let BlessFile { history } =
            read_bless_file(self.ctx.store.as_ref(), self.ctx.users_bucket(), dataset_id)?;
        let versions: Vec<u32> = history.iter().map(|e| e.version).collect();
        let bless_item = history.iter().max_by_key(|e| e.version).cloned();
        Ok(BlessedView {
            issues: audit_versions(&versions),
            bless_item,
            history,
        })
    }

    pub fn publish(
        &self,
        publisher: &UserInfo,
        dataset_id: &str,
        scoped_id: &str,
    ) -> Result<Publication, QuantError> {
        let (job_id, _) = JobId::parse_scoped(scoped_id)?;
        publish_quant(
            self.ctx.store.as_ref(),
            self.ctx.users_bucket(),
            dataset_id,
            &job_id,
            &publisher.user_id,
            self.ctx.now(),
        )
    }

    pub fn is_name_taken(
        &self,
        owner: &str,
        dataset_id: &str,
        name: &str,
    ) -> Result<bool, QuantError> {
        is_name_taken(
            self.ctx.store.as_ref(),
            self.ctx.users_bucket(),
            self.ctx.jobs_bucket(),
            owner,
            dataset_id,
            name,
        )
    }

    pub fn refresh_status(&self, dataset_id: &str) -> Result<DatasetJobMap, QuantError> {
        rebuild_dataset_map(
            self.ctx.store.as_ref(),
            self.ctx.jobs_bucket(),
            dataset_id,
            self.ctx.now(),
            stale_after_secs(self.ctx.config.max_runtime_seconds),
        )
    }

    /// Stores an externally produced quant CSV as a complete quantification.
    pub fn import_csv(
        &self,
        owner: &UserInfo,
        dataset_id: &str,
        name: &str,
        comments: &str,
        csv: &str,
    ) -> Result<JobId, QuantError> {
        if name.trim().is_empty() {
            return Err(QuantError::Validation("quantification name not supplied".into()));
        }
        if self.is_name_taken(&owner.user_id, dataset_id, name)? {
            return Err(QuantError::Conflict(format!("name already used: {name}")));
        }

        let converted = convert_quant_csv(csv, &ConvertOptions::default())?;
        let job_id = JobId::try_new(format!("upload_{}", self.ctx.ids.next_id()))?;
        let now = self.ctx.now();
        let quant_mode = if converted
            .quant
            .location_set
            .iter()
            .any(|set| set.detector == "Combined")
        {
            QuantMode::CombinedDetector
        } else {
            QuantMode::SeparateDetector
        };
        let point_count: HashSet<i32> = converted
            .quant
            .location_set
            .iter()
            .flat_map(|set| set.location.iter().map(|loc| loc.pmc))
            .collect();

        let starting = JobStartingParameters {
            pmcs: Vec::new(),
            params: JobParameters {
                name: name.to_string(),
                dataset_id: dataset_id.to_string(),
                dataset_path: paths::dataset_file(dataset_id),
                detector_config: String::new(),
                elements: converted.elements.clone(),
                parameters: String::new(),
                run_time_sec: 0,
                cores_per_node: 0,
                start_unix_time: now,
                creator: owner.clone(),
                roi_ids: Vec::new(),
                element_set_id: String::new(),
                piquant_version: "N/A".to_string(),
                quant_mode,
                comments: comments.to_string(),
                include_dwells: false,
                command: EngineCommand::Map,
            },
        };
        let mut params = starting.with_point_count();
        params.pmcs_count = i32::try_from(point_count.len()).unwrap_or(i32::MAX);

        let status = JobStatus {
            status: JobPhase::Complete,
            message: "Imported CSV".to_string(),
            end_unix_time: now,
            ..JobStatus::starting(job_id.clone(), paths::quant_dir(&owner.user_id, dataset_id))
        };
        let summary = JobSummary {
            shared: false,
            params,
            elements: converted.elements.clone(),
            status,
        };

        let bucket = self.ctx.users_bucket();
        let store = &self.ctx.store;
        store.put(
            bucket,
            &paths::quant_bin(&owner.user_id, dataset_id, &job_id),
            &converted.encode(),
        )?;
        store.put(
            bucket,
            &paths::quant_csv(&owner.user_id, dataset_id, &job_id),
            csv.as_bytes(),
        )?;
        store.put_json(
            bucket,
            &paths::quant_summary(&owner.user_id, dataset_id, &job_id),
            &summary,
        )?;
        tracing::info!(job_id = %job_id, dataset = %dataset_id, user_id = %owner.user_id, "quantification imported");
        Ok(job_id)
    }

    /// Decoded binary artifact; used to check stored quants.
    pub fn read_quant(
        &self,
        owner: &str,
        dataset_id: &str,
        scoped_id: &str,
    ) -> Result<pq_core::quant_proto::Quantification, QuantError> {
        let (job_id, shared) = JobId::parse_scoped(scoped_id)?;
        let scope = if shared { paths::SHARED_OWNER } else { owner };
        let bytes = self
            .ctx
            .store
            .get(self.ctx.users_bucket(), &paths::quant_bin(scope, dataset_id, &job_id))?;
        Ok(decode_quantification(&bytes)?)
    }

    pub fn read_log(
        &self,
        owner: &str,
        dataset_id: &str,
        scoped_id: &str,
        log_name: &str,
    ) -> Result<String, QuantError> {
        let (job_id, shared) = JobId::parse_scoped(scoped_id)?;
        let scope = if shared { paths::SHARED_OWNER } else { owner };
        let key = paths::quant_log(scope, dataset_id, &job_id, log_name);
        self.read_text(&key)
    }

    pub fn read_last_output(
        &self,
        owner: &str,
        dataset_id: &str,
        command: EngineCommand,
        which: LastOutput,
    ) -> Result<String, QuantError> {
        let file = match which {
            LastOutput::Csv => paths::LAST_OUTPUT_CSV,
            LastOutput::Log => paths::LAST_OUTPUT_LOG,
        };
        let key = format!(
            "{}{file}",
            paths::last_output_dir(owner, dataset_id, command.as_str())
        );
        self.read_text(&key)
    }

    fn read_text(&self, key: &str) -> Result<String, QuantError> {
        match self.ctx.store.get_text(self.ctx.users_bucket(), key) {
            Ok(text) => Ok(text),
            Err(err) if err.is_not_found() => Err(QuantError::NotFound(format!("{key} not found"))),
            Err(err) => Err(err.into()),
        }
    }
}

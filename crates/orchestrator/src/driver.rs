#![forbid(unsafe_code)]

//! Runs one quantification job from request to stored artifacts.
//!
//! `create_job` validates, stores `params.json` and the `Starting` status, then hands the rest
//! to a background thread:
//!
//! ```text
//! PreparingWorkers  load dataset, write work lists
//! WorkersRunning    run one engine worker per list
//! Aggregating       collect logs, merge result CSVs
//! Complete          binary + CSV + summary written (map), or last-<command>/ output (others)
//! ```
//!
//! Any failure after `Starting` ends in `Error` with the reason as the status message.

use crate::QuantError;
use crate::context::QuantContext;
use crate::naming::is_name_taken;
use crate::regions::{ALL_POINTS_REGION, resolve_regions};
use crate::status::JobStatusTracker;
use crate::validate::{effective_mode, split_detector_config, validate_request};
use pq_core::model::{
    EngineCommand, JobCreateRequest, JobParameters, JobPhase, JobStartingParameters, JobStatus,
    JobSummary, UserInfo,
};
use pq_core::planner::split_points;
use pq_core::worklist::{DwellReads, point_work_list, region_work_list, shard_list_name};
use pq_core::{
    ConvertOptions, JobId, RegionPoints, ShardCsv, ShardPlanRequest, combine_shards,
    convert_quant_csv, expand_regions, plan_shards, result_file_name,
};
use pq_runner::EngineParams;
use pq_storage::{ObjectStoreExt, paths};
use serde::Deserialize;
use std::sync::Mutex;
use std::thread::JoinHandle;

#[derive(Debug, Deserialize)]
struct EngineVersion {
    version: String,
}

/// A job whose params and initial status are stored; the driver runs on `handle`.
#[derive(Debug)]
pub struct StartedJob {
    pub job_id: JobId,
    pub handle: JoinHandle<Result<JobStatus, QuantError>>,
}

impl StartedJob {
    /// Blocks until the driver finishes and returns the terminal status.
    pub fn wait(self) -> Result<JobStatus, QuantError> {
        let job_id = self.job_id;
        self.handle
            .join()
            .map_err(|_| QuantError::EngineFailure(format!("driver for job {job_id} panicked")))?
    }
}

/// Engine image tag from `PixliseConfig/piquant-version.json`.
pub fn resolve_engine_version(ctx: &QuantContext) -> Result<String, QuantError> {
    match ctx
        .store
        .get_json::<EngineVersion>(ctx.config_bucket(), paths::engine_version())
    {
        Ok(v) if !v.version.trim().is_empty() => Ok(v.version.trim().to_string()),
        Ok(_) => Err(QuantError::Validation("engine version is empty".into())),
        Err(err) if err.is_not_found() => {
            Err(QuantError::Validation("engine version is not configured".into()))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn create_job(
    ctx: &QuantContext,
    request: JobCreateRequest,
    creator: UserInfo,
) -> Result<StartedJob, QuantError> {
    validate_request(&request)?;
    let piquant_version = resolve_engine_version(ctx)?;

    let (config_name, config_version) = split_detector_config(&request.detector_config)?;
    let config_key = paths::engine_config(config_name, config_version);
    if !ctx.store.exists(ctx.config_bucket(), &config_key)? {
        return Err(QuantError::Validation(format!(
            "detector config {} has no engine configuration",
            request.detector_config
        )));
    }

    let command = request.command;
    let dataset_id = request.dataset_id.trim().to_string();
    if command.is_map()
        && is_name_taken(
            ctx.store.as_ref(),
            ctx.users_bucket(),
            ctx.jobs_bucket(),
            &creator.user_id,
            &dataset_id,
            &request.name,
        )?
    {
        return Err(QuantError::Conflict(format!(
            "name already used: {}",
            request.name
        )));
    }

    let stem = ctx.ids.next_id();
    let (job_id, name) = if command.is_map() {
        (JobId::try_new(stem)?, request.name.clone())
    } else {
        let id = JobId::for_command(command.as_str(), &stem)?;
        let name = id.to_string();
        (id, name)
    };

    let quant_mode = effective_mode(&request);
    let starting = JobStartingParameters {
        pmcs: request.pmcs,
        params: JobParameters {
            name,
            dataset_path: paths::dataset_file(&dataset_id),
            dataset_id: dataset_id.clone(),
            detector_config: request.detector_config,
            elements: request.elements,
            parameters: request.parameters,
            run_time_sec: request.run_time_sec,
            cores_per_node: i32::try_from(ctx.config.cores_per_worker).unwrap_or(i32::MAX),
            start_unix_time: ctx.now(),
            creator,
            roi_ids: request.roi_ids,
            element_set_id: request.element_set_id,
            piquant_version,
            quant_mode,
            comments: request.comments,
            include_dwells: request.include_dwells,
            command,
        },
    };

    ctx.store.put_json(
        ctx.jobs_bucket(),
        &paths::job_params(&dataset_id, &job_id),
        &starting,
    )?;
    let owner_dir = paths::quant_dir(&starting.params.creator.user_id, &dataset_id);
    let tracker = JobStatusTracker::start(
        ctx.store.clone(),
        ctx.jobs_bucket(),
        ctx.clock.clone(),
        dataset_id.clone(),
        JobStatus::starting(job_id.clone(), owner_dir),
    )?;
    tracing::info!(
        job_id = %job_id,
        dataset = %dataset_id,
        command = %command,
        mode = quant_mode.as_str(),
        pmcs = starting.pmcs.len(),
        elements = ?starting.params.elements,
        detector_config = %starting.params.detector_config,
        "quantification created"
    );

    let creator = starting.params.creator.clone();
    let job_name = starting.params.name.clone();
    let initial = tracker.status().clone();
    let driver_ctx = ctx.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("quant-{job_id}"))
        .spawn(move || run_job(&driver_ctx, &starting, tracker));

    match spawned {
        Ok(handle) => Ok(StartedJob { job_id, handle }),
        Err(err) => {
            let message = format!("failed to start job driver: {err}");
            tracing::error!(
                job_id = %job_id,
                dataset = %dataset_id,
                error = %message,
                "quantification failed"
            );
            let mut tracker = JobStatusTracker::resume(
                ctx.store.clone(),
                ctx.jobs_bucket(),
                ctx.clock.clone(),
                dataset_id,
                initial,
            );
            // Already logged.
            let _ = report_failure(ctx, &creator, &job_name, &mut tracker, &message);
            Err(QuantError::Spawn(err))
        }
    }
}

/// Moves the job to `Error` and notifies its creator. The notification goes out even when the
/// status write fails.
fn report_failure(
    ctx: &QuantContext,
    creator: &UserInfo,
    job_name: &str,
    tracker: &mut JobStatusTracker,
    message: &str,
) -> Result<JobStatus, QuantError> {
    let written = tracker.fail(message);
    let status = match &written {
        Ok(status) => status.clone(),
        Err(err) => {
            tracing::error!(
                job_id = %tracker.job_id(),
                error = %err,
                "could not record job failure"
            );
            tracker
                .next_status(JobPhase::Error, message)
                .unwrap_or_else(|_| tracker.status().clone())
        }
    };
    ctx.notifier.job_failed(creator, job_name, &status);
    written
}

/// Drives a stored job to a terminal phase and sends the matching notification.
pub fn run_job(
    ctx: &QuantContext,
    starting: &JobStartingParameters,
    mut tracker: JobStatusTracker,
) -> Result<JobStatus, QuantError> {
    let params = &starting.params;
    let mut engine_error = None;

    match drive(ctx, starting, &mut tracker, &mut engine_error) {
        Ok(elements) => {
            let status = tracker.status().clone();
            let summary = JobSummary {
                shared: false,
                params: starting.with_point_count(),
                elements,
                status: status.clone(),
            };
            ctx.notifier.job_complete(&params.creator, &summary);
            Ok(status)
        }
        Err(err) => {
            let message = match engine_error {
                Some(engine) => format!("{err} (engine: {engine})"),
                None => err.to_string(),
            };
            tracing::error!(
                job_id = %tracker.job_id(),
                dataset = %params.dataset_id,
                kind = ?err.kind(),
                error = %message,
                "quantification failed"
            );
            report_failure(ctx, &params.creator, &params.name, &mut tracker, &message)
        }
    }
}

/// Everything after `Starting`. Returns the element columns of the result.
fn drive(
    ctx: &QuantContext,
    starting: &JobStartingParameters,
    tracker: &mut JobStatusTracker,
    engine_error: &mut Option<String>,
) -> Result<Vec<String>, QuantError> {
    let params = &starting.params;
    let job_id = tracker.job_id().clone();
    let dataset_id = params.dataset_id.as_str();
    let owner = params.creator.user_id.as_str();
    let combined = params.quant_mode.combines_detectors();

    tracker.advance(
        JobPhase::PreparingWorkers,
        &format!("Cores/Node: {}", params.cores_per_node),
    )?;

    let dataset = ctx.datasets.read_dataset(dataset_id)?;
    let dwell_points = dataset.dwell_pmcs();
    let dwells = DwellReads {
        include: params.include_dwells,
        points: &dwell_points,
    };

    let mut regions: Vec<RegionPoints> = Vec::new();
    let mut lists = Vec::new();
    let spectra_per_worker;
    if params.plans_by_region() {
        let mut ids = params.roi_ids.clone();
        if ids.is_empty() {
            ids.push(ALL_POINTS_REGION.to_string());
        }
        regions = resolve_regions(
            ctx.store.as_ref(),
            ctx.users_bucket(),
            owner,
            &dataset,
            dataset_id,
            &ids,
        )?;
        let list = region_work_list(&regions, paths::DATASET_FILE, combined, dwells);
        lists.push(write_list(ctx, dataset_id, &job_id, 0, &list.render())?);
        spectra_per_worker = regions.len() * if combined { 1 } else { 2 };
    } else {
        let plan = plan_shards(&ShardPlanRequest {
            measurement_count: starting.pmcs.len() * if combined { 1 } else { 2 },
            element_count: params.elements.len(),
            runtime_sec: u32::try_from(params.run_time_sec).unwrap_or(1),
            cores_per_worker: ctx.config.cores_per_worker,
            max_workers: ctx.config.max_workers,
            worker_count_override: ctx.config.node_count_override,
            map_command: params.command.is_map(),
            combined_detectors: combined,
        });
        tracing::debug!(job_id = %job_id, ?plan, "shard plan");
        for (idx, chunk) in split_points(&starting.pmcs, plan.points_per_shard)
            .iter()
            .enumerate()
        {
            let list = point_work_list(chunk, paths::DATASET_FILE, combined, dwells);
            lists.push(write_list(ctx, dataset_id, &job_id, idx, &list.render())?);
        }
        spectra_per_worker = plan.spectra_per_shard;
    }
    if lists.is_empty() {
        return Err(QuantError::Validation("nothing to quantify".into()));
    }

    tracker.advance(
        JobPhase::WorkersRunning,
        &format!(
            "Node count: {}, Spectra/Node: {spectra_per_worker}",
            lists.len()
        ),
    )?;

    let engine_params = engine_params(ctx, starting, &job_id);
    if let Err(err) = ctx
        .runner
        .run(&params.piquant_version, &engine_params, &lists)
    {
        tracing::error!(job_id = %job_id, error = %err, "engine workers failed");
        *engine_error = Some(err.to_string());
    }

    if params.command.is_map() {
        let logs = collect_logs(ctx, dataset_id, &job_id, owner);
        tracker.set_logs(logs);
    }
    tracker.advance(
        JobPhase::Aggregating,
        &format!("Combining CSVs from {} nodes...", lists.len()),
    )?;

    let shards = read_shards(ctx, dataset_id, &job_id, &lists)?;
    let nodes_ran = format!("Nodes ran: {}", lists.len());

    if !params.command.is_map() {
        let shard = shards
            .first()
            .ok_or_else(|| QuantError::EngineFailure("no result file".into()))?;
        store_last_output(ctx, dataset_id, &job_id, owner, params.command, shard)?;
        tracker.advance(JobPhase::Complete, &nodes_ran)?;
        return Ok(Vec::new());
    }

    let header = format!(
        "PIQUANT version: {} DetectorConfig: {}",
        params.piquant_version, params.detector_config
    );
    let merged = if params.plans_by_region() {
        let shard = shards
            .first()
            .ok_or_else(|| QuantError::EngineFailure("no result file".into()))?;
        expand_regions(&header, shard, &regions)?
    } else {
        combine_shards(&header, &shards)?
    };
    ctx.store.put(
        ctx.jobs_bucket(),
        &paths::combined_csv(dataset_id, &job_id),
        merged.as_bytes(),
    )?;

    let converted = convert_quant_csv(&merged, &ConvertOptions::default())?;
    let users = ctx.users_bucket();
    ctx.store.put(
        users,
        &paths::quant_bin(owner, dataset_id, &job_id),
        &converted.encode(),
    )?;
    ctx.store.put(
        users,
        &paths::quant_csv(owner, dataset_id, &job_id),
        merged.as_bytes(),
    )?;

    let done = tracker.next_status(JobPhase::Complete, &nodes_ran)?;
    let summary = JobSummary {
        shared: false,
        params: starting.with_point_count(),
        elements: converted.elements.clone(),
        status: done.clone(),
    };
    ctx.store.put_json(
        users,
        &paths::quant_summary(owner, dataset_id, &job_id),
        &summary,
    )?;
    tracker.commit(done)?;
    Ok(converted.elements)
}

fn write_list(
    ctx: &QuantContext,
    dataset_id: &str,
    job_id: &JobId,
    index: usize,
    contents: &str,
) -> Result<String, QuantError> {
    let name = shard_list_name(index);
    ctx.store.put(
        ctx.jobs_bucket(),
        &paths::job_file(dataset_id, job_id, &name),
        contents.as_bytes(),
    )?;
    Ok(name)
}

pub fn engine_params(
    ctx: &QuantContext,
    starting: &JobStartingParameters,
    job_id: &JobId,
) -> EngineParams {
    let p = &starting.params;
    EngineParams {
        runtime_env: ctx.config.environment_name.clone(),
        job_id: job_id.to_string(),
        jobs_path: paths::jobs_prefix(&p.dataset_id)
            .trim_end_matches('/')
            .to_string(),
        dataset_path: paths::dataset_dir(&p.dataset_id),
        detector_config: format!("DetectorConfig/{}/", p.detector_config),
        elements: p.elements.clone(),
        parameters: format!("{} -t,{}", p.parameters, p.cores_per_node)
            .trim_start()
            .to_string(),
        datasets_bucket: ctx.config.datasets_bucket.clone(),
        config_bucket: ctx.config.config_bucket.clone(),
        job_bucket: ctx.config.jobs_bucket.clone(),
        quant_name: p.name.clone(),
        pmc_list_name: String::new(),
        command: p.command.as_str().to_string(),
        requestor: p.creator.user_id.clone(),
    }
}

fn read_shards(
    ctx: &QuantContext,
    dataset_id: &str,
    job_id: &JobId,
    lists: &[String],
) -> Result<Vec<ShardCsv>, QuantError> {
    lists
        .iter()
        .map(|list| {
            let key = paths::job_file(dataset_id, job_id, &result_file_name(list));
            match ctx.store.get_text(ctx.jobs_bucket(), &key) {
                Ok(text) => Ok(ShardCsv::new(list.as_str(), text)),
                Err(err) if err.is_not_found() => Err(QuantError::EngineFailure(format!(
                    "worker for {list} produced no result file"
                ))),
                Err(err) => Err(err.into()),
            }
        })
        .collect()
}

/// Copies engine logs into the owner's `logs-<jobId>/` folder in parallel. Failures are logged
/// and skipped; the copied names come back sorted.
fn collect_logs(
    ctx: &QuantContext,
    dataset_id: &str,
    job_id: &JobId,
    owner: &str,
) -> Vec<String> {
    let jobs = ctx.jobs_bucket();
    let users = ctx.users_bucket();
    let keys = match ctx.store.list(jobs, &paths::engine_log_dir(dataset_id, job_id)) {
        Ok(keys) => keys,
        Err(err) => {
            tracing::warn!(job_id = %job_id, error = %err, "failed to list engine logs");
            return Vec::new();
        }
    };

    let copied: Mutex<Vec<String>> = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for key in &keys {
            let copied = &copied;
            scope.spawn(move || {
                let file = key.rsplit('/').next().unwrap_or(key);
                let name = paths::clean_log_name(file);
                let dst = paths::quant_log(owner, dataset_id, job_id, &name);
                match ctx.store.copy(jobs, key, users, &dst) {
                    Ok(()) => match copied.lock() {
                        Ok(mut guard) => guard.push(name),
                        Err(poisoned) => poisoned.into_inner().push(name),
                    },
                    Err(err) => {
                        tracing::warn!(job_id = %job_id, log = %key, error = %err, "failed to copy engine log");
                    }
                }
            });
        }
    });

    let mut names = copied
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    names.sort();
    names.dedup();
    names
}

/// Replaces `last-<command>/output.csv` and `piquant.log` in the owner's scope.
fn store_last_output(
    ctx: &QuantContext,
    dataset_id: &str,
    job_id: &JobId,
    owner: &str,
    command: EngineCommand,
    shard: &ShardCsv,
) -> Result<(), QuantError> {
    let users = ctx.users_bucket();
    let dir = paths::last_output_dir(owner, dataset_id, command.as_str());
    let csv_key = format!("{dir}{}", paths::LAST_OUTPUT_CSV);
    let log_key = format!("{dir}{}", paths::LAST_OUTPUT_LOG);

    for key in [&csv_key, &log_key] {
        if let Err(err) = ctx.store.delete(users, key) {
            tracing::warn!(key = %key, error = %err, "failed to delete previous command output");
        }
    }
    ctx.store.put(users, &csv_key, shard.text.as_bytes())?;

    match ctx
        .store
        .list(ctx.jobs_bucket(), &paths::engine_log_dir(dataset_id, job_id))
    {
        Ok(logs) => {
            if let Some(first) = logs.first()
                && let Err(err) = ctx.store.copy(ctx.jobs_bucket(), first, users, &log_key)
            {
                tracing::warn!(log = %first, error = %err, "failed to copy command log");
            }
        }
        Err(err) => tracing::warn!(job_id = %job_id, error = %err, "failed to list command logs"),
    }
    Ok(())
}

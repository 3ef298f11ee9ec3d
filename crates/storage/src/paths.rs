#![forbid(unsafe_code)]

//! Object-store key layout.
//!
//! ```text
//! jobs/<dataset>/<jobId>/{params.json,status.json,<list>,<list>_result.csv,output/combined.csv}
//! jobs/<dataset>/<jobId>/piquant-logs/<log>
//! job-status/<dataset>.json
//! quants/<owner>/<dataset>/{<jobId>.bin,<jobId>.csv,summary-<jobId>.json,logs-<jobId>/<log>}
//! quants/shared/<dataset>/blessed-quant.json
//! ```

use pq_core::JobId;

pub const SHARED_OWNER: &str = "shared";
pub const JOB_PARAMS_FILE: &str = "params.json";
pub const JOB_STATUS_FILE: &str = "status.json";
pub const DATASET_FILE: &str = "dataset.bin";
pub const DATASET_INDEX_FILE: &str = "dataset-index.json";
pub const BLESS_FILE: &str = "blessed-quant.json";
pub const ENGINE_LOG_DIR: &str = "piquant-logs";
pub const REGION_FILE: &str = "ROI.json";
pub const LAST_OUTPUT_CSV: &str = "output.csv";
pub const LAST_OUTPUT_LOG: &str = "piquant.log";

const SUMMARY_PREFIX: &str = "summary-";
const SUMMARY_SUFFIX: &str = ".json";

pub fn job_root(dataset: &str, job_id: &JobId) -> String {
    format!("jobs/{dataset}/{job_id}")
}

pub fn jobs_prefix(dataset: &str) -> String {
    format!("jobs/{dataset}/")
}

pub fn job_file(dataset: &str, job_id: &JobId, name: &str) -> String {
    format!("{}/{name}", job_root(dataset, job_id))
}

pub fn job_params(dataset: &str, job_id: &JobId) -> String {
    job_file(dataset, job_id, JOB_PARAMS_FILE)
}

pub fn job_status(dataset: &str, job_id: &JobId) -> String {
    job_file(dataset, job_id, JOB_STATUS_FILE)
}

pub fn combined_csv(dataset: &str, job_id: &JobId) -> String {
    job_file(dataset, job_id, "output/combined.csv")
}

pub fn engine_log_dir(dataset: &str, job_id: &JobId) -> String {
    format!("{}/{ENGINE_LOG_DIR}/", job_root(dataset, job_id))
}

/// Job id of a `jobs/<dataset>/<jobId>/status.json` key.
pub fn job_id_from_status_key<'a>(dataset: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix("jobs/")?
        .strip_prefix(dataset)?
        .strip_prefix('/')?
        .strip_suffix(JOB_STATUS_FILE)?
        .strip_suffix('/')
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

pub fn job_status_map(dataset: &str) -> String {
    format!("job-status/{dataset}.json")
}

pub fn quant_dir(owner: &str, dataset: &str) -> String {
    format!("quants/{owner}/{dataset}")
}

pub fn quant_bin(owner: &str, dataset: &str, job_id: &JobId) -> String {
    format!("{}/{job_id}.bin", quant_dir(owner, dataset))
}

pub fn quant_csv(owner: &str, dataset: &str, job_id: &JobId) -> String {
    format!("{}/{job_id}.csv", quant_dir(owner, dataset))
}

pub fn quant_summary(owner: &str, dataset: &str, job_id: &JobId) -> String {
    format!(
        "{}/{SUMMARY_PREFIX}{job_id}{SUMMARY_SUFFIX}",
        quant_dir(owner, dataset)
    )
}

pub fn summary_prefix(owner: &str, dataset: &str) -> String {
    format!("{}/{SUMMARY_PREFIX}", quant_dir(owner, dataset))
}

/// Job id of a `.../summary-<jobId>.json` key.
pub fn job_id_from_summary_key(key: &str) -> Option<&str> {
    let file = key.rsplit('/').next()?;
    file.strip_prefix(SUMMARY_PREFIX)?
        .strip_suffix(SUMMARY_SUFFIX)
        .filter(|id| !id.is_empty())
}

pub fn quant_log_dir(owner: &str, dataset: &str, job_id: &JobId) -> String {
    format!("{}/logs-{job_id}/", quant_dir(owner, dataset))
}

pub fn quant_log(owner: &str, dataset: &str, job_id: &JobId, log_name: &str) -> String {
    format!("{}{log_name}", quant_log_dir(owner, dataset, job_id))
}

pub fn blessed_file(dataset: &str) -> String {
    format!("{}/{BLESS_FILE}", quant_dir(SHARED_OWNER, dataset))
}

pub fn publications_file(dataset: &str) -> String {
    format!("Publish/{dataset}/publications.json")
}

pub fn last_output_dir(owner: &str, dataset: &str, command: &str) -> String {
    format!("{}/last-{command}/", quant_dir(owner, dataset))
}

pub fn detector_config(config_name: &str) -> String {
    format!("DetectorConfig/{config_name}/pixlise-config.json")
}

pub fn engine_config(config_name: &str, version: &str) -> String {
    format!("DetectorConfig/{config_name}/PiquantConfigs/{version}/config.json")
}

pub fn engine_version() -> &'static str {
    "PixliseConfig/piquant-version.json"
}

pub fn dataset_dir(dataset: &str) -> String {
    format!("Scans/{dataset}")
}

pub fn dataset_file(dataset: &str) -> String {
    format!("{}/{DATASET_FILE}", dataset_dir(dataset))
}

pub fn dataset_index(dataset: &str) -> String {
    format!("{}/{DATASET_INDEX_FILE}", dataset_dir(dataset))
}

pub fn region_library(owner: &str, dataset: &str) -> String {
    format!("UserContent/{owner}/{dataset}/{REGION_FILE}")
}

/// Engine logs are named after the list file (`node00001.pmcs_piquant.log`); drop the
/// `.pmcs` so collected names read `node00001_piquant.log`.
pub fn clean_log_name(log_name: &str) -> String {
    const MARKER: &str = ".pmcs_";
    match log_name.to_ascii_lowercase().find(MARKER) {
        Some(idx) => format!(
            "{}_{}",
            &log_name[..idx],
            &log_name[idx + MARKER.len()..]
        ),
        None => log_name.to_string(),
    }
}

#![forbid(unsafe_code)]
#![allow(dead_code)]

use pq_core::model::{EngineCommand, JobCreateRequest, JobStatus, JobSummary, QuantMode, UserInfo};
use pq_orchestrator::{
    ManualClock, Notifier, OrchestratorConfig, QuantContext, QuantService, SequentialJobIds,
    StoreDatasetReader,
};
use pq_runner::{EngineParams, QuantRunner, RunnerError};
use pq_storage::{MemoryObjectStore, ObjectOp, ObjectStore, ObjectStoreExt};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub(crate) const DATASET: &str = "ds1";
pub(crate) const ENGINE_VERSION: &str = "3.2.8";
pub(crate) const COLUMNS: &str = "PMC,SCLK,CaO_%,FeO-T_%,filename";
pub(crate) const START: i64 = 1_700_000_000;

pub(crate) fn user(id: &str) -> UserInfo {
    UserInfo {
        name: format!("User {id}"),
        user_id: id.to_string(),
        email: format!("{id}@example.org"),
    }
}

pub(crate) fn map_request(name: &str) -> JobCreateRequest {
    JobCreateRequest {
        name: name.to_string(),
        dataset_id: DATASET.to_string(),
        pmcs: vec![10, 11, 12, 13, 14, 15],
        elements: vec!["Ca".to_string(), "Fe".to_string()],
        detector_config: "PIXL/v5".to_string(),
        parameters: "-q,pPIETXCFsr -b,0,12,60,910,2800,16".to_string(),
        run_time_sec: 60,
        quant_mode: Some(QuantMode::SeparateDetector),
        command: EngineCommand::Map,
        ..JobCreateRequest::default()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RunCall {
    pub(crate) image: String,
    pub(crate) params: EngineParams,
    pub(crate) lists: Vec<String>,
    /// `status.json` as it stood when the workers were started.
    pub(crate) status: JobStatus,
}

/// Plays the engine: reads each work list and writes a result CSV and a log next to it.
pub(crate) struct FakeEngine {
    store: Arc<MemoryObjectStore>,
    fail_lists: HashSet<String>,
    /// Status writes fail from the moment the workers finish.
    break_status_writes: bool,
    calls: Mutex<Vec<RunCall>>,
}

impl FakeEngine {
    pub(crate) fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self {
            store,
            fail_lists: HashSet::new(),
            break_status_writes: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(store: Arc<MemoryObjectStore>, list: &str) -> Self {
        let mut engine = Self::new(store);
        engine.fail_lists.insert(list.to_string());
        engine
    }

    pub(crate) fn breaking_status_writes(store: Arc<MemoryObjectStore>) -> Self {
        let mut engine = Self::new(store);
        engine.break_status_writes = true;
        engine
    }

    pub(crate) fn calls(&self) -> Vec<RunCall> {
        self.calls.lock().expect("calls").clone()
    }
}

/// Engine row for one work-list line.
pub(crate) fn result_row(line: &str) -> String {
    let (region, tokens) = match line.split_once(':') {
        Some((region, tokens)) => (Some(region), tokens),
        None => (None, line),
    };
    let mut first_pmc = None;
    let mut detectors = HashSet::new();
    for token in tokens.split(',') {
        let parts: Vec<&str> = token.split('|').collect();
        if first_pmc.is_none() {
            first_pmc = Some(parts[0].parse::<i32>().expect("pmc"));
        }
        detectors.insert(parts[2]);
    }
    let pmc = first_pmc.expect("non-empty line");
    let detector = if detectors.len() == 2 {
        "Combined"
    } else {
        detectors.into_iter().next().expect("detector")
    };
    let filename = match region {
        Some(region) => format!("Normal_{detector}_{region}"),
        None => format!("Normal_{detector}"),
    };
    let ca = f64::from(pmc) / 10.0;
    format!("{pmc},{},{ca:.1},{:.1},{filename}", 1000 + pmc, ca + 1.0)
}

impl QuantRunner for FakeEngine {
    fn run(
        &self,
        engine_image: &str,
        params: &EngineParams,
        list_names: &[String],
    ) -> Result<(), RunnerError> {
        let bucket = params.job_bucket.as_str();
        let root = format!("{}/{}", params.jobs_path, params.job_id);
        let status = self
            .store
            .get_json(bucket, &format!("{root}/status.json"))
            .expect("status during run");
        self.calls.lock().expect("calls").push(RunCall {
            image: engine_image.to_string(),
            params: params.clone(),
            lists: list_names.to_vec(),
            status,
        });

        let mut failure = None;
        for list in list_names {
            if self.fail_lists.contains(list) {
                failure = Some(RunnerError::WorkerFailed {
                    list: list.clone(),
                    reason: "exit code 1".to_string(),
                });
                continue;
            }
            let body = self
                .store
                .get_text(bucket, &format!("{root}/{list}"))
                .expect("work list");
            let mut csv = format!("PIQUANT output for {list}\n{COLUMNS}\n");
            for line in body.lines().skip(1) {
                csv.push_str(&result_row(line));
                csv.push('\n');
            }
            self.store
                .put(bucket, &format!("{root}/{list}_result.csv"), csv.as_bytes())
                .expect("result");
            self.store
                .put(
                    bucket,
                    &format!("{root}/piquant-logs/{list}_piquant.log"),
                    format!("log of {list}\n").as_bytes(),
                )
                .expect("log");
        }
        if self.break_status_writes {
            self.store
                .fail_on(ObjectOp::Put, "status.json", "status store offline");
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) completed: Mutex<Vec<(String, String)>>,
    pub(crate) failed: Mutex<Vec<(String, String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn job_complete(&self, user: &UserInfo, summary: &JobSummary) {
        self.completed
            .lock()
            .expect("completed")
            .push((user.user_id.clone(), summary.job_id().to_string()));
    }

    fn job_failed(&self, user: &UserInfo, job_name: &str, status: &JobStatus) {
        self.failed.lock().expect("failed").push((
            user.user_id.clone(),
            job_name.to_string(),
            status.message.clone(),
        ));
    }
}

pub(crate) struct Harness {
    pub(crate) store: Arc<MemoryObjectStore>,
    pub(crate) engine: Arc<FakeEngine>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) service: QuantService,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::build(OrchestratorConfig::default(), FakeEngine::new)
    }

    pub(crate) fn with_workers(count: u32) -> Self {
        let config = OrchestratorConfig {
            node_count_override: count,
            ..OrchestratorConfig::default()
        };
        Self::build(config, FakeEngine::new)
    }

    pub(crate) fn with_failing_list(count: u32, list: &str) -> Self {
        let config = OrchestratorConfig {
            node_count_override: count,
            ..OrchestratorConfig::default()
        };
        Self::build(config, |store| FakeEngine::failing(store, list))
    }

    /// One worker; every status write after the engine run fails.
    pub(crate) fn with_status_outage() -> Self {
        let config = OrchestratorConfig {
            node_count_override: 1,
            ..OrchestratorConfig::default()
        };
        Self::build(config, FakeEngine::breaking_status_writes)
    }

    fn build(
        config: OrchestratorConfig,
        engine: impl FnOnce(Arc<MemoryObjectStore>) -> FakeEngine,
    ) -> Self {
        let store = Arc::new(MemoryObjectStore::new());
        seed(&store, &config);
        let engine = Arc::new(engine(store.clone()));
        let clock = Arc::new(ManualClock::at(START));
        let notifier = Arc::new(RecordingNotifier::default());
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let ctx = QuantContext {
            config: Arc::new(config.clone()),
            store: dyn_store.clone(),
            runner: engine.clone(),
            clock: clock.clone(),
            ids: Arc::new(SequentialJobIds::new("t")),
            notifier: notifier.clone(),
            datasets: Arc::new(StoreDatasetReader::new(
                dyn_store,
                config.datasets_bucket.clone(),
            )),
        };
        Self {
            store,
            engine,
            clock,
            notifier,
            config,
            service: QuantService::new(ctx),
        }
    }

    pub(crate) fn users(&self) -> &str {
        &self.config.users_bucket
    }

    pub(crate) fn jobs(&self) -> &str {
        &self.config.jobs_bucket
    }
}

/// Engine version, detector config, a seven-location dataset (the last without spectra, PMC 12
/// with a dwell) and region libraries for `u1` and the shared scope.
fn seed(store: &MemoryObjectStore, config: &OrchestratorConfig) {
    store
        .put_json(
            &config.config_bucket,
            "PixliseConfig/piquant-version.json",
            &json!({ "version": ENGINE_VERSION }),
        )
        .expect("seed version");
    store
        .put_json(
            &config.config_bucket,
            "DetectorConfig/PIXL/PiquantConfigs/v5/config.json",
            &json!({ "description": "PIXL flight model" }),
        )
        .expect("seed detector config");

    let normal = json!([
        { "detector": "A", "readType": "Normal" },
        { "detector": "B", "readType": "Normal" }
    ]);
    let dwell = json!([
        { "detector": "A", "readType": "Normal" },
        { "detector": "B", "readType": "Normal" },
        { "detector": "A", "readType": "Dwell" },
        { "detector": "B", "readType": "Dwell" }
    ]);
    let locations: Vec<serde_json::Value> = (10..=15)
        .map(|pmc| {
            let spectra = if pmc == 12 { &dwell } else { &normal };
            json!({ "pmc": pmc, "spectra": spectra })
        })
        .chain(std::iter::once(json!({ "pmc": 99 })))
        .collect();
    store
        .put_json(
            &config.datasets_bucket,
            &format!("Scans/{DATASET}/dataset-index.json"),
            &json!({ "datasetId": DATASET, "locations": locations }),
        )
        .expect("seed dataset");

    store
        .put_json(
            &config.users_bucket,
            &format!("UserContent/u1/{DATASET}/ROI.json"),
            &json!({ "roi1": { "name": "Dark rock", "locationIndexes": [2, 0, 1, 6] } }),
        )
        .expect("seed user regions");
    store
        .put_json(
            &config.users_bucket,
            &format!("UserContent/shared/{DATASET}/ROI.json"),
            &json!({ "roi2": { "name": "Vein", "locationIndexes": [3, 4] } }),
        )
        .expect("seed shared regions");
}

pub(crate) fn quant_csv(rows: &[&str]) -> String {
    let mut csv = format!("Imported quant\n{COLUMNS}\n");
    for row in rows {
        csv.push_str(row);
        csv.push('\n');
    }
    csv
}

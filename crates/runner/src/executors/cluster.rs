#![forbid(unsafe_code)]

use crate::{EngineParams, PlatformError, QuantRunner, RunnerError, run_all};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const MAP_CPU_REQUEST: &str = "3500m";
const COMMAND_CPU_REQUEST: &str = "250m";
const CPU_LIMIT: &str = "3500m";
const ENGINE_ENTRYPOINT: &str = "/usr/PIQUANT/PiquantRunner";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl UnitPhase {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// One engine worker as submitted to the container platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkUnitSpec {
    pub name: String,
    pub namespace: String,
    pub container_name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub pull_policy: String,
}

impl WorkUnitSpec {
    /// Pod manifest for the platform API.
    pub fn to_manifest(&self) -> Value {
        let env: Vec<Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": self.labels,
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": self.container_name,
                    "image": self.image,
                    "imagePullPolicy": self.pull_policy,
                    "command": [ENGINE_ENTRYPOINT],
                    "resources": {
                        "requests": { "cpu": self.cpu_request },
                        "limits": { "cpu": self.cpu_limit },
                    },
                    "env": env,
                }],
            },
        })
    }
}

/// Container platform API used by [`ClusterRunner`].
pub trait ContainerPlatform: Send + Sync {
    fn create(&self, unit: &WorkUnitSpec) -> Result<(), PlatformError>;

    fn phase(&self, namespace: &str, name: &str) -> Result<UnitPhase, PlatformError>;

    fn delete(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSettings {
    pub namespace: String,
    pub region: String,
    pub poll_interval: Duration,
    /// Wall-clock cap per worker.
    pub max_runtime: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            namespace: "piquant-map".to_string(),
            region: String::new(),
            poll_interval: Duration::from_secs(5),
            max_runtime: Duration::from_secs(3600),
        }
    }
}

/// `node00003.pmcs` -> `node00003`
fn list_stem(list_name: &str) -> &str {
    list_name.split('.').next().unwrap_or(list_name)
}

pub fn work_unit_spec(
    image: &str,
    params: &EngineParams,
    settings: &ClusterSettings,
) -> Result<WorkUnitSpec, RunnerError> {
    let stem = list_stem(&params.pmc_list_name);
    let job_label = format!("job-{}", params.job_id);
    let cpu_request = if params.command == "map" {
        MAP_CPU_REQUEST
    } else {
        COMMAND_CPU_REQUEST
    };

    let labels = BTreeMap::from([
        ("owner".to_string(), params.requestor.clone()),
        ("jobid".to_string(), job_label.clone()),
        ("command".to_string(), params.command.clone()),
        ("app".to_string(), stem.to_string()),
    ]);
    let env = vec![
        ("QUANT_PARAMS".to_string(), params.to_env_json()?),
        ("AWS_DEFAULT_REGION".to_string(), settings.region.clone()),
        ("PYTHONUNBUFFERED".to_string(), "TRUE".to_string()),
    ];

    Ok(WorkUnitSpec {
        name: format!("{job_label}-{stem}").to_ascii_lowercase(),
        namespace: settings.namespace.clone(),
        container_name: stem.to_ascii_lowercase(),
        image: image.to_string(),
        env,
        labels,
        cpu_request: cpu_request.to_string(),
        cpu_limit: CPU_LIMIT.to_string(),
        pull_policy: "Always".to_string(),
    })
}

/// Runs each list as a work unit on a container platform and polls it until it leaves
/// `Pending`/`Running` or exceeds the per-worker cap.
pub struct ClusterRunner<P> {
    platform: P,
    settings: ClusterSettings,
}

impl<P: ContainerPlatform> ClusterRunner<P> {
    pub fn new(platform: P, settings: ClusterSettings) -> Self {
        Self { platform, settings }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn remove(&self, unit: &WorkUnitSpec) {
        tracing::info!(unit = %unit.name, namespace = %unit.namespace, "deleting work unit");
        if let Err(err) = self.platform.delete(&unit.namespace, &unit.name) {
            tracing::warn!(unit = %unit.name, error = %err, "failed to delete work unit");
        }
    }

    fn run_worker(&self, image: &str, params: &EngineParams) -> Result<(), RunnerError> {
        let list = params.pmc_list_name.clone();
        let unit = work_unit_spec(image, params, &self.settings)?;
        self.platform
            .create(&unit)
            .map_err(|err| RunnerError::Unavailable {
                list: list.clone(),
                reason: err.to_string(),
            })?;
        tracing::info!(list = %list, unit = %unit.name, namespace = %unit.namespace, "work unit created");

        let started = Instant::now();
        let mut last_phase = None;
        loop {
            match self.platform.phase(&unit.namespace, &unit.name) {
                Ok(phase) => {
                    if last_phase != Some(phase) {
                        tracing::info!(list = %list, phase = ?phase, "work unit phase");
                        last_phase = Some(phase);
                    }
                    if !phase.is_active() {
                        if phase != UnitPhase::Succeeded {
                            tracing::warn!(list = %list, phase = ?phase, "work unit ended without success");
                        }
                        self.remove(&unit);
                        return Ok(());
                    }
                }
                Err(err) => {
                    tracing::warn!(list = %list, error = %err, "failed to read work unit phase");
                }
            }

            if started.elapsed() >= self.settings.max_runtime {
                self.remove(&unit);
                return Err(RunnerError::Timeout {
                    list,
                    seconds: self.settings.max_runtime.as_secs(),
                });
            }
            std::thread::sleep(self.settings.poll_interval);
        }
    }
}

impl<P: ContainerPlatform> QuantRunner for ClusterRunner<P> {
    fn run(
        &self,
        engine_image: &str,
        params: &EngineParams,
        list_names: &[String],
    ) -> Result<(), RunnerError> {
        tracing::info!(job_id = %params.job_id, workers = list_names.len(), "starting work units");
        run_all(list_names, |list| {
            self.run_worker(engine_image, &params.for_list(list))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePlatform {
        created: Mutex<Vec<WorkUnitSpec>>,
        deleted: Mutex<Vec<String>>,
        polls: Mutex<HashMap<String, usize>>,
        refuse: Option<String>,
        /// Polls each unit stays Running before Succeeded; `usize::MAX` never finishes.
        running_polls: usize,
    }

    impl ContainerPlatform for FakePlatform {
        fn create(&self, unit: &WorkUnitSpec) -> Result<(), PlatformError> {
            if self.refuse.as_deref() == Some(unit.name.as_str()) {
                return Err(PlatformError::Command {
                    action: "create",
                    reason: "quota exceeded".to_string(),
                });
            }
            self.created.lock().expect("lock").push(unit.clone());
            Ok(())
        }

        fn phase(&self, _namespace: &str, name: &str) -> Result<UnitPhase, PlatformError> {
            let mut polls = self.polls.lock().expect("lock");
            let count = polls.entry(name.to_string()).or_default();
            *count += 1;
            if *count <= self.running_polls {
                Ok(UnitPhase::Running)
            } else {
                Ok(UnitPhase::Succeeded)
            }
        }

        fn delete(&self, _namespace: &str, name: &str) -> Result<(), PlatformError> {
            self.deleted.lock().expect("lock").push(name.to_string());
            Ok(())
        }
    }

    fn params(command: &str) -> EngineParams {
        EngineParams {
            job_id: "AbC123".to_string(),
            command: command.to_string(),
            requestor: "user-1".to_string(),
            ..EngineParams::default()
        }
    }

    fn settings() -> ClusterSettings {
        ClusterSettings {
            namespace: "quant".to_string(),
            region: "us-east-1".to_string(),
            poll_interval: Duration::from_millis(1),
            max_runtime: Duration::from_secs(5),
        }
    }

    fn lists(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("node{i:05}.pmcs")).collect()
    }

    #[test]
    fn unit_spec_carries_labels_env_and_resources() {
        let map_params = params("map").for_list("node00004.pmcs");
        let spec = work_unit_spec("piquant:3.2", &map_params, &settings()).expect("spec");
        assert_eq!(spec.name, "job-abc123-node00004");
        assert_eq!(spec.labels["owner"], "user-1");
        assert_eq!(spec.labels["jobid"], "job-AbC123");
        assert_eq!(spec.labels["command"], "map");
        assert_eq!(spec.labels["app"], "node00004");
        assert_eq!(spec.cpu_request, "3500m");
        assert_eq!(spec.pull_policy, "Always");
        let env: HashMap<_, _> = spec.env.iter().cloned().collect();
        assert_eq!(env["PYTHONUNBUFFERED"], "TRUE");
        assert_eq!(env["AWS_DEFAULT_REGION"], "us-east-1");
        assert!(env["QUANT_PARAMS"].contains("node00004.pmcs"));

        let manifest = spec.to_manifest();
        assert_eq!(manifest["metadata"]["labels"]["app"], "node00004");
        assert_eq!(
            manifest["spec"]["containers"][0]["resources"]["limits"]["cpu"],
            "3500m"
        );

        let quant_params = params("quant").for_list("node00000.pmcs");
        let quant = work_unit_spec("img", &quant_params, &settings()).expect("spec");
        assert_eq!(quant.cpu_request, "250m");
    }

    #[test]
    fn finished_units_are_deleted() {
        let runner = ClusterRunner::new(
            FakePlatform {
                running_polls: 2,
                ..FakePlatform::default()
            },
            settings(),
        );
        runner.run("img", &params("map"), &lists(3)).expect("run");
        assert_eq!(runner.platform().created.lock().expect("lock").len(), 3);
        let mut deleted = runner.platform().deleted.lock().expect("lock").clone();
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "job-abc123-node00000",
                "job-abc123-node00001",
                "job-abc123-node00002"
            ]
        );
    }

    #[test]
    fn refused_unit_is_reported_while_peers_finish() {
        let runner = ClusterRunner::new(
            FakePlatform {
                refuse: Some("job-abc123-node00001".to_string()),
                ..FakePlatform::default()
            },
            settings(),
        );
        let err = runner
            .run("img", &params("map"), &lists(3))
            .expect_err("refused");
        assert!(matches!(err, RunnerError::Unavailable { list, .. } if list == "node00001.pmcs"));
        assert_eq!(runner.platform().deleted.lock().expect("lock").len(), 2);
    }

    #[test]
    fn stuck_units_time_out() {
        let runner = ClusterRunner::new(
            FakePlatform {
                running_polls: usize::MAX,
                ..FakePlatform::default()
            },
            ClusterSettings {
                max_runtime: Duration::from_millis(20),
                ..settings()
            },
        );
        let err = runner
            .run("img", &params("map"), &lists(1))
            .expect_err("timeout");
        assert!(matches!(err, RunnerError::Timeout { .. }));
        assert_eq!(runner.platform().deleted.lock().expect("lock").len(), 1);
    }
}

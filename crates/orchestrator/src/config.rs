#![forbid(unsafe_code)]

use crate::QuantError;
use pq_runner::ExecutorKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Orchestrator settings, read from a JSON or YAML file with kebab-case keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub cores_per_worker: u32,
    pub max_workers: u32,
    /// Non-zero pins the worker count.
    pub node_count_override: u32,
    pub max_runtime_seconds: u64,
    pub jobs_bucket: String,
    pub datasets_bucket: String,
    pub users_bucket: String,
    pub config_bucket: String,
    pub kube_namespace: String,
    pub executor: String,
    pub aws_region: String,
    pub environment_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cores_per_worker: 6,
            max_workers: 20,
            node_count_override: 0,
            max_runtime_seconds: 3600,
            jobs_bucket: "piquant-jobs".to_string(),
            datasets_bucket: "datasets".to_string(),
            users_bucket: "users".to_string(),
            config_bucket: "config".to_string(),
            kube_namespace: "piquant-map".to_string(),
            executor: ExecutorKind::default().as_str().to_string(),
            aws_region: "us-east-1".to_string(),
            environment_name: "local".to_string(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_count(name: &str, raw: &str) -> Result<u32, QuantError> {
    raw.parse::<u32>()
        .map_err(|err| QuantError::Config(format!("{name}={raw:?}: {err}")))
}

impl OrchestratorConfig {
    pub fn from_file(path: &Path) -> Result<Self, QuantError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| QuantError::Config(format!("read {}: {err}", path.display())))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml(&raw),
            _ => Self::from_json(&raw),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, QuantError> {
        serde_json::from_str(raw).map_err(|err| QuantError::Config(format!("json: {err}")))
    }

    pub fn from_yaml(raw: &str) -> Result<Self, QuantError> {
        serde_yaml::from_str(raw).map_err(|err| QuantError::Config(format!("yaml: {err}")))
    }

    /// Applies `PQ_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), QuantError> {
        self.apply_overrides(env_var)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), QuantError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PQ_CORES_PER_WORKER") {
            self.cores_per_worker = parse_count("PQ_CORES_PER_WORKER", &raw)?;
        }
        if let Some(raw) = lookup("PQ_MAX_WORKERS") {
            self.max_workers = parse_count("PQ_MAX_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("PQ_NODE_COUNT_OVERRIDE") {
            self.node_count_override = parse_count("PQ_NODE_COUNT_OVERRIDE", &raw)?;
        }
        if let Some(raw) = lookup("PQ_EXECUTOR") {
            self.executor = raw;
        }
        if let Some(raw) = lookup("PQ_KUBE_NAMESPACE") {
            self.kube_namespace = raw;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), QuantError> {
        if self.cores_per_worker == 0 {
            return Err(QuantError::Config("cores-per-worker must be positive".into()));
        }
        if self.max_workers == 0 {
            return Err(QuantError::Config("max-workers must be positive".into()));
        }
        if self.max_runtime_seconds == 0 {
            return Err(QuantError::Config("max-runtime-seconds must be positive".into()));
        }
        for (key, bucket) in [
            ("jobs-bucket", &self.jobs_bucket),
            ("datasets-bucket", &self.datasets_bucket),
            ("users-bucket", &self.users_bucket),
            ("config-bucket", &self.config_bucket),
        ] {
            if bucket.trim().is_empty() {
                return Err(QuantError::Config(format!("{key} must not be empty")));
            }
        }
        self.executor_kind()?;
        Ok(())
    }

    pub fn executor_kind(&self) -> Result<ExecutorKind, QuantError> {
        self.executor.parse::<ExecutorKind>().map_err(QuantError::Config)
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_keys_take_defaults() {
        let cfg = OrchestratorConfig::from_json(r#"{ "max-workers": 50 }"#).expect("config");
        assert_eq!(cfg.max_workers, 50);
        assert_eq!(cfg.cores_per_worker, 6);
        assert_eq!(cfg.max_runtime_seconds, 3600);
        cfg.validate().expect("valid");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = OrchestratorConfig::from_yaml("max-workerz: 3\n").expect_err("unknown key");
        assert!(err.to_string().contains("max-workerz"), "{err}");
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = OrchestratorConfig::default();
        let env = HashMap::from([
            ("PQ_MAX_WORKERS", "4"),
            ("PQ_EXECUTOR", "null"),
            ("PQ_KUBE_NAMESPACE", "quant-dev"),
        ]);
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(cfg.max_workers, 4);
        assert_eq!(cfg.executor_kind().expect("kind"), ExecutorKind::Null);
        assert_eq!(cfg.kube_namespace, "quant-dev");

        let bad = HashMap::from([("PQ_CORES_PER_WORKER", "many")]);
        assert!(
            cfg.apply_overrides(|name| bad.get(name).map(|v| v.to_string()))
                .is_err()
        );
    }

    #[test]
    fn validation_rejects_zero_counts_and_empty_buckets() {
        let cfg = OrchestratorConfig {
            cores_per_worker: 0,
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = OrchestratorConfig {
            users_bucket: " ".to_string(),
            ..OrchestratorConfig::default()
        };
        let err = cfg.validate().expect_err("empty bucket");
        assert!(err.to_string().contains("users-bucket"));

        let cfg = OrchestratorConfig {
            executor: "lambda".to_string(),
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}

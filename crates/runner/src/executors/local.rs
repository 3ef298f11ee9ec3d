#![forbid(unsafe_code)]

use crate::{EngineParams, QuantRunner, RunnerError, run_all};
use std::process::{Command, Stdio};

const ENGINE_ENTRYPOINT: &str = "/usr/PIQUANT/PiquantRunner";

/// Runs one local container per list via the docker CLI.
#[derive(Clone, Debug)]
pub struct LocalContainerRunner {
    pub docker_bin: String,
    pub region: String,
}

impl LocalContainerRunner {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            docker_bin: "docker".to_string(),
            region: region.into(),
        }
    }

    fn run_worker(&self, image: &str, params: &EngineParams) -> Result<(), RunnerError> {
        let list = params.pmc_list_name.clone();
        let payload = params.to_env_json()?;
        let credentials = ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]
            .into_iter()
            .filter(|key| std::env::var_os(key).is_some())
            .collect::<Vec<_>>();

        let mut cmd = Command::new(&self.docker_bin);
        append_run_args(&mut cmd, image, &payload, &self.region, &credentials);
        tracing::info!(list = %list, image = %image, "starting local engine container");

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RunnerError::Spawn {
                list: list.clone(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            tracing::debug!(list = %list, "{line}");
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RunnerError::WorkerFailed {
                list,
                reason: format!("{} ({stderr})", output.status),
            });
        }
        tracing::info!(list = %list, "local engine container finished");
        Ok(())
    }
}

/// Credential variables are forwarded by name only; docker copies the value from this process.
fn append_run_args(
    cmd: &mut Command,
    image: &str,
    payload: &str,
    region: &str,
    credentials: &[&str],
) {
    cmd.arg("run")
        .arg("--rm")
        .arg("-e")
        .arg(format!("QUANT_PARAMS={payload}"))
        .arg("-e")
        .arg("PYTHONUNBUFFERED=TRUE")
        .arg("-e")
        .arg(format!("AWS_DEFAULT_REGION={region}"));
    for key in credentials {
        cmd.arg("-e").arg(key);
    }
    cmd.arg(image).arg(ENGINE_ENTRYPOINT);
}

impl QuantRunner for LocalContainerRunner {
    fn run(
        &self,
        engine_image: &str,
        params: &EngineParams,
        list_names: &[String],
    ) -> Result<(), RunnerError> {
        run_all(list_names, |list| {
            self.run_worker(engine_image, &params.for_list(list))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_for(credentials: &[&str]) -> Vec<String> {
        let mut cmd = Command::new("docker");
        append_run_args(&mut cmd, "piquant:3.2", "{\"jobId\":\"j\"}", "us-east-1", credentials);
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect::<Vec<_>>()
    }

    #[test]
    fn image_and_entrypoint_come_last() {
        let args = args_for(&[]);
        assert_eq!(args[0], "run");
        assert_eq!(args[1], "--rm");
        assert_eq!(
            &args[args.len() - 2..],
            &["piquant:3.2".to_string(), ENGINE_ENTRYPOINT.to_string()]
        );
        assert!(
            args.windows(2)
                .any(|pair| pair[0] == "-e" && pair[1] == "QUANT_PARAMS={\"jobId\":\"j\"}"),
            "expected params env: {args:?}"
        );
        assert!(args.iter().any(|arg| arg == "AWS_DEFAULT_REGION=us-east-1"));
    }

    #[test]
    fn credentials_are_forwarded_by_name() {
        let args = args_for(&["AWS_ACCESS_KEY_ID"]);
        assert!(
            args.windows(2)
                .any(|pair| pair[0] == "-e" && pair[1] == "AWS_ACCESS_KEY_ID"),
            "{args:?}"
        );
        assert!(!args.iter().any(|arg| arg.starts_with("AWS_ACCESS_KEY_ID=")));
    }
}

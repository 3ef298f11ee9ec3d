#![forbid(unsafe_code)]

use crate::executors::cluster::{ContainerPlatform, UnitPhase, WorkUnitSpec};
use crate::PlatformError;
use std::io::Write;
use std::process::{Command, Stdio};

/// [`ContainerPlatform`] backed by the `kubectl` binary.
#[derive(Clone, Debug)]
pub struct KubectlPlatform {
    pub kubectl_bin: String,
}

impl Default for KubectlPlatform {
    fn default() -> Self {
        Self {
            kubectl_bin: "kubectl".to_string(),
        }
    }
}

fn append_apply_args(cmd: &mut Command, namespace: &str) {
    cmd.arg("apply").arg("-n").arg(namespace).arg("-f").arg("-");
}

fn append_phase_args(cmd: &mut Command, namespace: &str, name: &str) {
    cmd.arg("get")
        .arg("pod")
        .arg(name)
        .arg("-n")
        .arg(namespace)
        .arg("-o")
        .arg("jsonpath={.status.phase}");
}

fn append_delete_args(cmd: &mut Command, namespace: &str, name: &str) {
    cmd.arg("delete")
        .arg("pod")
        .arg(name)
        .arg("-n")
        .arg(namespace)
        .arg("--wait=false")
        .arg("--ignore-not-found");
}

fn run(
    mut cmd: Command,
    action: &'static str,
    stdin: Option<&[u8]>,
) -> Result<String, PlatformError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    let mut child = cmd.spawn()?;
    if let Some(bytes) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(bytes)?;
        }
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(PlatformError::Command {
            action,
            reason: format!("{} ({stderr})", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

impl ContainerPlatform for KubectlPlatform {
    fn create(&self, unit: &WorkUnitSpec) -> Result<(), PlatformError> {
        let manifest = serde_json::to_vec(&unit.to_manifest())?;
        let mut cmd = Command::new(&self.kubectl_bin);
        append_apply_args(&mut cmd, &unit.namespace);
        run(cmd, "create work unit", Some(&manifest)).map(|_| ())
    }

    fn phase(&self, namespace: &str, name: &str) -> Result<UnitPhase, PlatformError> {
        let mut cmd = Command::new(&self.kubectl_bin);
        append_phase_args(&mut cmd, namespace, name);
        let out = run(cmd, "read work unit phase", None)?;
        Ok(UnitPhase::parse(&out))
    }

    fn delete(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        let mut cmd = Command::new(&self.kubectl_bin);
        append_delete_args(&mut cmd, namespace, name);
        run(cmd, "delete work unit", None).map(|_| ())
    }
}

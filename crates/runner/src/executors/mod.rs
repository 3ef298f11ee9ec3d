#![forbid(unsafe_code)]

pub mod cluster;
pub mod kubectl;
pub mod local;
pub mod null;

use std::str::FromStr;

/// Which backend runs engine workers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExecutorKind {
    #[default]
    Kubernetes,
    Docker,
    Null,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::Kubernetes => "kubernetes",
            ExecutorKind::Docker => "docker",
            ExecutorKind::Null => "null",
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "docker" => Ok(Self::Docker),
            "null" => Ok(Self::Null),
            other => Err(format!("unknown quant executor: {other:?}")),
        }
    }
}

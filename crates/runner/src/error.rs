#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("{list}: worker exceeded {seconds}s")]
    Timeout { list: String, seconds: u64 },
    #[error("{list}: container platform refused work unit: {reason}")]
    Unavailable { list: String, reason: String },
    #[error("{list}: worker failed: {reason}")]
    WorkerFailed { list: String, reason: String },
    #[error("{list}: failed to start worker: {source}")]
    Spawn {
        list: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialise engine params: {0}")]
    Params(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{action} failed: {reason}")]
    Command { action: &'static str, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

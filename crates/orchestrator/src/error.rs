#![forbid(unsafe_code)]

use pq_core::ids::JobIdError;
use pq_core::{CombineError, ConvertError};
use pq_runner::RunnerError;
use pq_storage::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    DependencyMissing,
    EngineFailure,
    FormatFailure,
    Transport,
    Timeout,
    Unavailable,
    NotFound,
    Conflict,
    Forbidden,
    /// The orchestrator's own settings are unusable.
    Config,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::DependencyMissing | Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Forbidden => 403,
            Self::EngineFailure
            | Self::FormatFailure
            | Self::Transport
            | Self::Timeout
            | Self::Unavailable
            | Self::Config => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuantError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    DependencyMissing(String),
    #[error("{0}")]
    EngineFailure(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("invalid job id: {0}")]
    JobId(#[from] JobIdError),
    #[error("config: {0}")]
    Config(String),
    #[error("failed to start job thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Combine(#[from] CombineError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

impl QuantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::JobId(_) => ErrorKind::Validation,
            Self::Config(_) => ErrorKind::Config,
            Self::DependencyMissing(_) => ErrorKind::DependencyMissing,
            Self::EngineFailure(_) => ErrorKind::EngineFailure,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Spawn(_) => ErrorKind::Unavailable,
            Self::Store(err) if err.is_not_found() => ErrorKind::DependencyMissing,
            Self::Store(_) => ErrorKind::Transport,
            Self::Runner(RunnerError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Runner(RunnerError::Unavailable { .. }) => ErrorKind::Unavailable,
            Self::Runner(_) => ErrorKind::EngineFailure,
            Self::Combine(_) | Self::Convert(_) => ErrorKind::FormatFailure,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_http_codes() {
        let missing = QuantError::from(StoreError::not_found("users", "quants/u/ds/summary-j.json"));
        assert_eq!(missing.kind(), ErrorKind::DependencyMissing);
        assert_eq!(missing.http_status(), 404);

        let transport = QuantError::from(StoreError::Transport {
            op: "put",
            bucket: "jobs".to_string(),
            key: "k".to_string(),
            reason: "503".to_string(),
        });
        assert_eq!(transport.kind(), ErrorKind::Transport);
        assert_eq!(transport.http_status(), 500);

        let timeout = QuantError::from(RunnerError::Timeout {
            list: "node00000.pmcs".to_string(),
            seconds: 3600,
        });
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        assert_eq!(QuantError::Validation("bad".into()).http_status(), 400);
        assert_eq!(QuantError::Conflict("taken".into()).http_status(), 409);
        assert_eq!(QuantError::Forbidden("no".into()).http_status(), 403);
        let config = QuantError::Config("max-workers must be positive".into());
        assert_eq!(config.kind(), ErrorKind::Config);
        assert_eq!(config.http_status(), 500);
        assert_eq!(
            QuantError::from(CombineError::NoShards).kind(),
            ErrorKind::FormatFailure
        );
    }
}

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Caller-facing prefix marking an id as living in the shared scope.
pub const SHARED_PREFIX: &str = "shared-";

const MAX_JOB_ID_LEN: usize = 128;

/// Storage-level job id: URL-safe, never carries the `shared-` scope prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, JobIdError> {
        let value = value.into();
        validate_job_id(&value)?;
        Ok(Self(value))
    }

    /// Id for a non-map command run, e.g. `cmd-quant-<id>`.
    pub fn for_command(command: &str, base: &str) -> Result<Self, JobIdError> {
        Self::try_new(format!("cmd-{command}-{base}"))
    }

    /// Accepts either a bare id or a `shared-` prefixed one and reports which scope it names.
    pub fn parse_scoped(value: &str) -> Result<(Self, bool), JobIdError> {
        let (bare, shared) = strip_shared_prefix(value);
        Ok((Self::try_new(bare)?, shared))
    }

    pub fn shared_display(&self) -> String {
        format!("{SHARED_PREFIX}{}", self.0)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum JobIdError {
    #[error("job id is empty")]
    Empty,
    #[error("job id is longer than {MAX_JOB_ID_LEN} characters")]
    TooLong,
    #[error("job id carries the shared scope prefix")]
    ScopePrefix,
    #[error("job id has invalid character {ch:?} at index {index}")]
    InvalidChar { ch: char, index: usize },
}

fn validate_job_id(value: &str) -> Result<(), JobIdError> {
    if value.is_empty() {
        return Err(JobIdError::Empty);
    }
    if value.len() > MAX_JOB_ID_LEN {
        return Err(JobIdError::TooLong);
    }
    if value.starts_with(SHARED_PREFIX) {
        return Err(JobIdError::ScopePrefix);
    }
    for (index, ch) in value.chars().enumerate() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
            continue;
        }
        return Err(JobIdError::InvalidChar { ch, index });
    }
    Ok(())
}

/// Splits a caller-facing id into its bare form and whether it named the shared scope.
pub fn strip_shared_prefix(value: &str) -> (&str, bool) {
    match value.strip_prefix(SHARED_PREFIX) {
        Some(bare) => (bare, true),
        None => (value, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_prefix_is_stripped_at_the_boundary() {
        let (id, shared) = JobId::parse_scoped("shared-abc123").expect("scoped id");
        assert!(shared);
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.shared_display(), "shared-abc123");

        let (id, shared) = JobId::parse_scoped("abc123").expect("bare id");
        assert!(!shared);
        assert_eq!(id.as_str(), "abc123");
    }

    #[test]
    fn rejects_unsafe_ids() {
        assert_eq!(JobId::try_new(""), Err(JobIdError::Empty));
        assert_eq!(JobId::try_new("shared-x"), Err(JobIdError::ScopePrefix));
        assert_eq!(
            JobId::try_new("a/b"),
            Err(JobIdError::InvalidChar { ch: '/', index: 1 })
        );
        assert!(JobId::try_new("x".repeat(129)).is_err());
    }

    #[test]
    fn command_ids_are_prefixed() {
        let id = JobId::for_command("quant", "k3j2").expect("command id");
        assert_eq!(id.as_str(), "cmd-quant-k3j2");
    }
}

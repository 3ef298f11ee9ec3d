#![forbid(unsafe_code)]

use crate::QuantError;
use pq_core::model::{EngineCommand, JobCreateRequest, QuantMode};
use regex::Regex;
use std::sync::OnceLock;

/// Characters the engine's option string may contain. Anything else could reach a shell.
const ENGINE_OPTIONS_PATTERN: &str = r#"^[A-Za-z0-9 .,_"-]+$"#;

fn engine_options_regex() -> Result<&'static Regex, QuantError> {
    static RE: OnceLock<Result<Regex, String>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ENGINE_OPTIONS_PATTERN).map_err(|err| err.to_string()))
        .as_ref()
        .map_err(|err| QuantError::Config(format!("engine options pattern: {err}")))
}

pub fn validate_engine_options(options: &str) -> Result<(), QuantError> {
    if options.is_empty() {
        return Ok(());
    }
    if !engine_options_regex()?.is_match(options) {
        return Err(QuantError::Validation(format!(
            "invalid engine options: {options}"
        )));
    }
    Ok(())
}

/// `PIXL/v5` -> (`PIXL`, `v5`).
pub fn split_detector_config(config: &str) -> Result<(&str, &str), QuantError> {
    match config.split('/').collect::<Vec<_>>().as_slice() {
        [name, version] if !name.is_empty() && !version.is_empty() => Ok((*name, *version)),
        _ => Err(QuantError::Validation(format!(
            "detector config {config:?} is not in name/version form"
        ))),
    }
}

/// Mode used when the request leaves it out.
pub fn effective_mode(request: &JobCreateRequest) -> QuantMode {
    match request.quant_mode {
        Some(mode) => mode,
        None if request.command.is_map() => QuantMode::CombinedDetector,
        None => QuantMode::NonMapCommand,
    }
}

/// Checks that need no storage access.
pub fn validate_request(request: &JobCreateRequest) -> Result<(), QuantError> {
    if request.dataset_id.trim().is_empty() {
        return Err(QuantError::Validation("dataset id not supplied".into()));
    }
    if request.command == EngineCommand::Map && request.name.trim().is_empty() {
        return Err(QuantError::Validation("quantification name not supplied".into()));
    }
    if request.elements.iter().all(|e| e.trim().is_empty()) {
        return Err(QuantError::Validation("elements not supplied".into()));
    }
    split_detector_config(&request.detector_config)?;
    if request.run_time_sec < 1 {
        return Err(QuantError::Validation(format!(
            "run time {} is invalid",
            request.run_time_sec
        )));
    }

    if request.pmcs.is_empty() {
        return Err(QuantError::Validation("no PMCs specified".into()));
    }
    let by_region = effective_mode(request).by_region();
    if request.command.is_map() && by_region && request.roi_ids.is_empty() {
        return Err(QuantError::Validation(
            "no region ids supplied for a by-region quantification".into(),
        ));
    }

    validate_engine_options(&request.parameters)
}

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Parameters every engine worker receives, JSON-encoded in `QUANT_PARAMS`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineParams {
    pub runtime_env: String,
    pub job_id: String,
    pub jobs_path: String,
    pub dataset_path: String,
    pub detector_config: String,
    pub elements: Vec<String>,
    pub parameters: String,
    pub datasets_bucket: String,
    pub config_bucket: String,
    pub job_bucket: String,
    pub quant_name: String,
    /// Filled per worker with the list that worker processes.
    pub pmc_list_name: String,
    pub command: String,
    /// User the job runs for; used for work-unit labels, never sent to the engine.
    #[serde(skip)]
    pub requestor: String,
}

impl EngineParams {
    pub fn for_list(&self, list_name: &str) -> Self {
        Self {
            pmc_list_name: list_name.to_string(),
            ..self.clone()
        }
    }

    pub fn to_env_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

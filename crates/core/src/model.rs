#![forbid(unsafe_code)]

use crate::ids::JobId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub name: String,
    #[serde(alias = "user_id")]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// How detectors and points are grouped for the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantMode {
    #[serde(rename = "separate-detector", alias = "AB")]
    SeparateDetector,
    #[serde(rename = "combined-detector", alias = "Combined")]
    CombinedDetector,
    #[serde(rename = "separate-detector-by-region", alias = "ABBulk")]
    SeparateDetectorByRegion,
    #[serde(rename = "combined-detector-by-region", alias = "CombinedBulk")]
    CombinedDetectorByRegion,
    #[serde(rename = "fit")]
    Fit,
    #[serde(rename = "non-map-command")]
    NonMapCommand,
}

impl QuantMode {
    pub fn combines_detectors(self) -> bool {
        !matches!(self, Self::SeparateDetector | Self::SeparateDetectorByRegion)
    }

    pub fn by_region(self) -> bool {
        !matches!(self, Self::SeparateDetector | Self::CombinedDetector)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SeparateDetector => "separate-detector",
            Self::CombinedDetector => "combined-detector",
            Self::SeparateDetectorByRegion => "separate-detector-by-region",
            Self::CombinedDetectorByRegion => "combined-detector-by-region",
            Self::Fit => "fit",
            Self::NonMapCommand => "non-map-command",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineCommand {
    #[default]
    Map,
    Quant,
    Fit,
}

impl EngineCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Quant => "quant",
            Self::Fit => "fit",
        }
    }

    pub fn is_map(self) -> bool {
        self == Self::Map
    }
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters a job was started with. Written once to `params.json`, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParameters {
    pub name: String,
    #[serde(rename = "datasetID")]
    pub dataset_id: String,
    pub dataset_path: String,
    pub detector_config: String,
    pub elements: Vec<String>,
    #[serde(default)]
    pub parameters: String,
    pub run_time_sec: i32,
    pub cores_per_node: i32,
    pub start_unix_time: i64,
    pub creator: UserInfo,
    #[serde(rename = "roiIDs", default)]
    pub roi_ids: Vec<String>,
    #[serde(rename = "elementSetID", default)]
    pub element_set_id: String,
    pub piquant_version: String,
    pub quant_mode: QuantMode,
    #[serde(default)]
    pub comments: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_dwells: bool,
    #[serde(default)]
    pub command: EngineCommand,
}

impl JobParameters {
    /// Region planning applies to region modes and to every non-map command.
    pub fn plans_by_region(&self) -> bool {
        self.quant_mode.by_region() || !self.command.is_map()
    }
}

/// The stored params file: full point list plus the shared parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStartingParameters {
    pub pmcs: Vec<i32>,
    #[serde(flatten)]
    pub params: JobParameters,
}

impl JobStartingParameters {
    pub fn with_point_count(&self) -> JobParamsWithPointCount {
        JobParamsWithPointCount {
            pmcs_count: i32::try_from(self.pmcs.len()).unwrap_or(i32::MAX),
            params: self.params.clone(),
        }
    }
}

/// Summary form of the parameters: the point list collapsed to its cardinality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobParamsWithPointCount {
    #[serde(rename = "pmcsCount")]
    pub pmcs_count: i32,
    #[serde(flatten)]
    pub params: JobParameters,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobPhase {
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "preparing_nodes")]
    PreparingWorkers,
    #[serde(rename = "nodes_running")]
    WorkersRunning,
    #[serde(rename = "gathering_results")]
    Aggregating,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Position in the forward sequence. `Error` sits outside it.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Self::Starting => Some(0),
            Self::PreparingWorkers => Some(1),
            Self::WorkersRunning => Some(2),
            Self::Aggregating => Some(3),
            Self::Complete => Some(4),
            Self::Error => None,
        }
    }

    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.ordinal(), next.ordinal()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::PreparingWorkers => "preparing_nodes",
            Self::WorkersRunning => "nodes_running",
            Self::Aggregating => "gathering_results",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub status: JobPhase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub end_unix_time: i64,
    #[serde(default)]
    pub output_file_path: String,
    #[serde(default)]
    pub piquant_log_list: Vec<String>,
}

impl JobStatus {
    pub fn starting(job_id: JobId, output_file_path: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobPhase::Starting,
            message: String::new(),
            end_unix_time: 0,
            output_file_path: output_file_path.into(),
            piquant_log_list: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(default)]
    pub shared: bool,
    pub params: JobParamsWithPointCount,
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobSummary {
    pub fn job_id(&self) -> &JobId {
        &self.status.job_id
    }

    pub fn creator_id(&self) -> &str {
        &self.params.params.creator.user_id
    }

    pub fn name(&self) -> &str {
        &self.params.params.name
    }
}

/// Body of a job-create request. The creator is bound by the caller, not read from here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobCreateRequest {
    pub name: String,
    #[serde(rename = "datasetID")]
    pub dataset_id: String,
    pub pmcs: Vec<i32>,
    #[serde(rename = "roiIDs")]
    pub roi_ids: Vec<String>,
    pub elements: Vec<String>,
    pub detector_config: String,
    pub parameters: String,
    pub run_time_sec: i32,
    pub quant_mode: Option<QuantMode>,
    pub command: EngineCommand,
    pub include_dwells: bool,
    #[serde(rename = "elementSetID")]
    pub element_set_id: String,
    pub comments: String,
}

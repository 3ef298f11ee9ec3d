#![forbid(unsafe_code)]

pub mod combine;
pub mod convert;
pub mod dataset;
pub mod filename;
pub mod ids;
pub mod model;
pub mod planner;
pub mod quant_proto;
pub mod worklist;

pub use combine::{CombineError, ShardCsv, combine_shards, expand_regions, result_file_name};
pub use convert::{ConvertError, ConvertOptions, ConvertedQuant, PmcMatch, convert_quant_csv};
pub use filename::DetectorTag;
pub use ids::JobId;
pub use planner::{ShardPlan, ShardPlanRequest, plan_shards};
pub use worklist::{RegionPoints, WorkList};

#![forbid(unsafe_code)]

//! Quantification job orchestration: request validation, worker fan-out, result merging,
//! status tracking and the sharing/blessing workflow around finished quants.

pub mod blessing;
pub mod clock;
pub mod config;
pub mod context;
pub mod datasets;
pub mod driver;
mod error;
pub mod idgen;
pub mod naming;
pub mod notify;
pub mod regions;
pub mod service;
pub mod sharing;
pub mod status;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OrchestratorConfig;
pub use context::QuantContext;
pub use datasets::{DatasetReader, StoreDatasetReader};
pub use driver::{StartedJob, create_job};
pub use error::{ErrorKind, QuantError};
pub use idgen::{JobIdGenerator, RandomJobIds, SequentialJobIds};
pub use notify::{LogNotifier, Notifier};
pub use service::{BlessedView, JobListing, LastOutput, QuantService};

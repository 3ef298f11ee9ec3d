#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::datasets::DatasetReader;
use crate::idgen::JobIdGenerator;
use crate::notify::Notifier;
use pq_runner::QuantRunner;
use pq_storage::ObjectStore;
use std::sync::Arc;

/// Everything a job needs, shared between the request path and the background driver.
#[derive(Clone)]
pub struct QuantContext {
    pub config: Arc<OrchestratorConfig>,
    pub store: Arc<dyn ObjectStore>,
    pub runner: Arc<dyn QuantRunner>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn JobIdGenerator>,
    pub notifier: Arc<dyn Notifier>,
    pub datasets: Arc<dyn DatasetReader>,
}

impl QuantContext {
    pub fn jobs_bucket(&self) -> &str {
        &self.config.jobs_bucket
    }

    pub fn users_bucket(&self) -> &str {
        &self.config.users_bucket
    }

    pub fn config_bucket(&self) -> &str {
        &self.config.config_bucket
    }

    pub fn now(&self) -> i64 {
        self.clock.now_unix_sec()
    }
}

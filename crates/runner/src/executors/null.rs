#![forbid(unsafe_code)]

use crate::{EngineParams, QuantRunner, RunnerError};
use std::time::Duration;

/// Starts nothing; logs each list and returns after `delay`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRunner {
    pub delay: Duration,
}

impl QuantRunner for NullRunner {
    fn run(
        &self,
        engine_image: &str,
        params: &EngineParams,
        list_names: &[String],
    ) -> Result<(), RunnerError> {
        for list in list_names {
            tracing::info!(job_id = %params.job_id, list = %list, image = %engine_image, "null runner skipping worker");
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(())
    }
}

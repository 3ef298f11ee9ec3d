#![forbid(unsafe_code)]

mod error;
pub mod executors;
mod fanout;
mod params;

pub use error::{PlatformError, RunnerError};
pub use executors::ExecutorKind;
pub use executors::cluster::{
    ClusterRunner, ClusterSettings, ContainerPlatform, UnitPhase, WorkUnitSpec,
};
pub use executors::kubectl::KubectlPlatform;
pub use executors::local::LocalContainerRunner;
pub use executors::null::NullRunner;
pub use fanout::run_all;
pub use params::EngineParams;

/// Runs one engine worker per list and waits for all of them.
///
/// Output files are written by the engine itself (`<list>_result.csv` next to the list); the
/// runner only reports whether any worker failed fatally.
pub trait QuantRunner: Send + Sync {
    fn run(
        &self,
        engine_image: &str,
        params: &EngineParams,
        list_names: &[String],
    ) -> Result<(), RunnerError>;
}

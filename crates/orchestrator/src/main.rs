#![forbid(unsafe_code)]

//! pq-orchestrator: command-line front end for quantification jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pq_core::model::{EngineCommand, JobCreateRequest, UserInfo};
use pq_orchestrator::{
    LastOutput, LogNotifier, OrchestratorConfig, QuantContext, QuantService, RandomJobIds,
    StoreDatasetReader, SystemClock,
};
use pq_runner::{
    ClusterRunner, ClusterSettings, ExecutorKind, KubectlPlatform, LocalContainerRunner,
    NullRunner, QuantRunner,
};
use pq_storage::{ObjectStore, SqliteObjectStore};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CLUSTER_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "pq-orchestrator")]
#[command(version, about = "Quantification job orchestrator", long_about = None)]
struct Cli {
    /// Settings file (.json, .yaml or .yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the object store database
    #[arg(long, default_value = ".pq-store")]
    storage_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct Caller {
    #[arg(long)]
    user_id: String,
    #[arg(long, default_value = "")]
    user_name: String,
    #[arg(long, default_value = "")]
    email: String,
}

impl Caller {
    fn user(&self) -> UserInfo {
        UserInfo {
            name: self.user_name.clone(),
            user_id: self.user_id.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputKind {
    Csv,
    Log,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a job from a JSON request body
    Create {
        #[arg(long)]
        request: PathBuf,
        #[command(flatten)]
        caller: Caller,
        /// Block until the job reaches a terminal state
        #[arg(long)]
        wait: bool,
    },
    /// List the caller's and shared quantifications of a dataset
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        user_id: String,
    },
    /// Show one summary (`shared-` ids address the shared scope)
    Show {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        user_id: String,
        job_id: String,
    },
    Share {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        user_id: String,
        job_id: String,
    },
    /// Mark a quantification as the dataset's reference
    Bless {
        #[arg(long)]
        dataset: String,
        #[command(flatten)]
        caller: Caller,
        job_id: String,
    },
    /// Print the blessing history
    Blessed {
        #[arg(long)]
        dataset: String,
    },
    Publish {
        #[arg(long)]
        dataset: String,
        #[command(flatten)]
        caller: Caller,
        job_id: String,
    },
    Delete {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        user_id: String,
        job_id: String,
    },
    /// Report whether a quantification name is in use
    CheckName {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        user_id: String,
        name: String,
    },
    /// Rebuild the dataset's job status map
    RefreshStatus {
        #[arg(long)]
        dataset: String,
    },
    /// Store a quant CSV produced elsewhere
    ImportCsv {
        #[arg(long)]
        dataset: String,
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        comments: String,
        csv: PathBuf,
    },
    /// Print a collected engine log
    Log {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        user_id: String,
        job_id: String,
        log_name: String,
    },
    /// Print the last output of a non-map command
    LastOutput {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        command: String,
        #[arg(long, value_enum, default_value = "csv")]
        kind: OutputKind,
    },
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let mut config = match path {
        Some(path) => OrchestratorConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };
    config.apply_env().context("invalid environment override")?;
    config.validate()?;
    Ok(config)
}

fn build_runner(config: &OrchestratorConfig) -> Result<Arc<dyn QuantRunner>> {
    let runner: Arc<dyn QuantRunner> = match config.executor_kind()? {
        ExecutorKind::Kubernetes => Arc::new(ClusterRunner::new(
            KubectlPlatform::default(),
            ClusterSettings {
                namespace: config.kube_namespace.clone(),
                region: config.aws_region.clone(),
                poll_interval: CLUSTER_POLL_INTERVAL,
                max_runtime: config.max_runtime(),
            },
        )),
        ExecutorKind::Docker => Arc::new(LocalContainerRunner::new(config.aws_region.clone())),
        ExecutorKind::Null => Arc::new(NullRunner::default()),
    };
    Ok(runner)
}

fn build_service(cli: &Cli) -> Result<QuantService> {
    let config = load_config(cli.config.as_deref())?;
    let store: Arc<dyn ObjectStore> = Arc::new(
        SqliteObjectStore::open(&cli.storage_dir).context("failed to open object store")?,
    );
    let runner = build_runner(&config)?;
    tracing::debug!(executor = %config.executor, storage = %cli.storage_dir.display(), "service configured");

    let datasets = Arc::new(StoreDatasetReader::new(
        store.clone(),
        config.datasets_bucket.clone(),
    ));
    Ok(QuantService::new(QuantContext {
        config: Arc::new(config),
        store,
        runner,
        clock: Arc::new(SystemClock),
        ids: Arc::new(RandomJobIds),
        notifier: Arc::new(LogNotifier),
        datasets,
    }))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_command(raw: &str) -> Result<EngineCommand> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .with_context(|| format!("unknown engine command {raw:?}"))
}

fn run(cli: Cli) -> Result<()> {
    let service = build_service(&cli)?;

    match cli.command {
        Commands::Create {
            request,
            caller,
            wait,
        } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("failed to read {}", request.display()))?;
            let body: JobCreateRequest =
                serde_json::from_str(&raw).context("invalid job request")?;
            let started = service.create_job(body, caller.user())?;
            let job_id = started.job_id.clone();
            if wait {
                let status = started.wait()?;
                print_json(&status)?;
            } else {
                print_json(&serde_json::json!({ "jobId": job_id }))?;
            }
        }
        Commands::List { dataset, user_id } => {
            print_json(&service.list_jobs(&user_id, &dataset)?)?;
        }
        Commands::Show {
            dataset,
            user_id,
            job_id,
        } => {
            print_json(&service.get_summary(&user_id, &dataset, &job_id)?)?;
        }
        Commands::Share {
            dataset,
            user_id,
            job_id,
        } => {
            service.share(&user_id, &dataset, &job_id)?;
            print_json(&serde_json::json!({ "shared": job_id }))?;
        }
        Commands::Bless {
            dataset,
            caller,
            job_id,
        } => {
            print_json(&service.bless(&caller.user(), &dataset, &job_id)?)?;
        }
        Commands::Blessed { dataset } => {
            print_json(&service.blessed(&dataset)?)?;
        }
        Commands::Publish {
            dataset,
            caller,
            job_id,
        } => {
            print_json(&service.publish(&caller.user(), &dataset, &job_id)?)?;
        }
        Commands::Delete {
            dataset,
            user_id,
            job_id,
        } => {
            service.delete_job(&user_id, &dataset, &job_id)?;
            print_json(&serde_json::json!({ "deleted": job_id }))?;
        }
        Commands::CheckName {
            dataset,
            user_id,
            name,
        } => {
            let taken = service.is_name_taken(&user_id, &dataset, &name)?;
            print_json(&serde_json::json!({ "name": name, "taken": taken }))?;
        }
        Commands::RefreshStatus { dataset } => {
            print_json(&service.refresh_status(&dataset)?)?;
        }
        Commands::ImportCsv {
            dataset,
            caller,
            name,
            comments,
            csv,
        } => {
            let body = std::fs::read_to_string(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let job_id = service.import_csv(&caller.user(), &dataset, &name, &comments, &body)?;
            print_json(&serde_json::json!({ "jobId": job_id }))?;
        }
        Commands::Log {
            dataset,
            user_id,
            job_id,
            log_name,
        } => {
            print!("{}", service.read_log(&user_id, &dataset, &job_id, &log_name)?);
        }
        Commands::LastOutput {
            dataset,
            user_id,
            command,
            kind,
        } => {
            let which = match kind {
                OutputKind::Csv => LastOutput::Csv,
                OutputKind::Log => LastOutput::Log,
            };
            let command = parse_command(&command)?;
            print!(
                "{}",
                service.read_last_output(&user_id, &dataset, command, which)?
            );
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dockhand::artifacts::ArtifactStore;
use dockhand::cancellation::CancellationToken;
use dockhand::config::{PipelineFile, RunnerConfig};
use dockhand::core::{PipelineReport, PipelineStatus};
use dockhand::events::LoggingEventSink;
use dockhand::executor::StageExecutor;
use dockhand::observability::{init_logging, LogFormat};
use dockhand::pipeline::{Pipeline, PipelineRunner};
use dockhand::runtime::{ContainerRuntime, DockerRuntime, HostRuntime};
use dockhand::secrets::SecretValue;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dockhand", version)]
#[command(about = "Run dependency-ordered pipelines in isolated container environments", long_about = None)]
struct Cli {
    /// Log line format
    #[arg(long, global = true, default_value = "text", env = "DOCKHAND_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline file
        file: PathBuf,
        /// Where stages execute
        #[arg(long, value_enum, default_value_t = RuntimeKind::Docker, env = "DOCKHAND_RUNTIME")]
        runtime: RuntimeKind,
        /// Maximum stages running at once
        #[arg(short, long)]
        parallel: Option<usize>,
        /// Default per-stage timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Artifact output directory
        #[arg(short, long)]
        artifacts: Option<PathBuf>,
        /// Secret value as NAME=VALUE; overrides the file's sources
        #[arg(short, long = "secret", value_parser = parse_secret)]
        secrets: Vec<(String, String)>,
        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Show the execution levels of a pipeline
    Plan {
        /// Pipeline file
        file: PathBuf,
    },
    /// Check a pipeline file without running it
    Validate {
        /// Pipeline file
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeKind {
    /// Docker Engine containers
    Docker,
    /// Local processes in scratch directories
    Host,
}

fn parse_secret(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

fn load(file: &Path, artifacts: &ArtifactStore) -> Result<(PipelineFile, Pipeline)> {
    let spec = PipelineFile::load(file)?;
    let pipeline = spec.clone().into_pipeline(artifacts).map_err(|e| {
        let context = match e.fix_hint() {
            Some(hint) => format!("invalid pipeline in {} (hint: {hint})", file.display()),
            None => format!("invalid pipeline in {}", file.display()),
        };
        anyhow::Error::new(e).context(context)
    })?;
    Ok((spec, pipeline))
}

fn exit_code_for(report: &PipelineReport) -> ExitCode {
    match report.status {
        PipelineStatus::Succeeded => ExitCode::SUCCESS,
        PipelineStatus::Cancelled => ExitCode::from(130),
        PipelineStatus::Failed => {
            let code = report
                .exit_code
                .and_then(|c| u8::try_from(c).ok())
                .filter(|c| *c != 0)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn print_summary(report: &PipelineReport) {
    for (stage, status) in &report.stages {
        let duration = report
            .result(stage)
            .map(|r| format!(" ({:.1}s)", r.duration().as_secs_f64()))
            .unwrap_or_default();
        let status = status.to_string();
        println!("  {status:<10} {stage}{duration}");
    }
    match report.status {
        PipelineStatus::Succeeded => println!(
            "Pipeline '{}' succeeded in {:.1}s",
            report.pipeline,
            report.duration.as_secs_f64()
        ),
        _ => println!(
            "Pipeline '{}' {}: {}",
            report.pipeline,
            report.status,
            report.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}

async fn run(
    file: PathBuf,
    runtime: RuntimeKind,
    parallel: Option<usize>,
    timeout: Option<u64>,
    artifacts: Option<PathBuf>,
    secrets: Vec<(String, String)>,
    json: bool,
) -> Result<ExitCode> {
    let mut config = RunnerConfig::from_env()?;
    if let Some(n) = parallel {
        config = config.with_max_parallel(n);
    }
    if let Some(secs) = timeout {
        if secs == 0 {
            bail!("--timeout must be positive");
        }
        config = config.with_stage_timeout(Duration::from_secs(secs));
    }
    if let Some(dir) = artifacts {
        config = config.with_artifact_root(dir);
    }

    let store = Arc::new(ArtifactStore::new(&config.artifact_root));
    let (spec, pipeline) = load(&file, &store)?;
    let mut secret_store = spec.secret_store()?;
    for (name, value) in secrets {
        secret_store.insert(name, SecretValue::new(value));
    }

    let runtime: Arc<dyn ContainerRuntime> = match runtime {
        RuntimeKind::Docker => Arc::new(DockerRuntime::connect().await.context("is the Docker daemon running?")?),
        RuntimeKind::Host => Arc::new(HostRuntime::new()),
    };
    info!(runtime = runtime.name(), artifacts = %config.artifact_root.display(), "Using runtime");

    let executor = Arc::new(StageExecutor::new(runtime, store));
    let runner = PipelineRunner::new(executor, config).with_event_sink(Arc::new(LoggingEventSink::debug()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling pipeline");
            on_signal.cancel("interrupted");
        }
    });

    let report = runner.run(&pipeline, &secret_store, &cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(exit_code_for(&report))
}

fn store_from_env() -> Result<ArtifactStore> {
    Ok(ArtifactStore::new(RunnerConfig::from_env()?.artifact_root))
}

fn plan(file: &Path) -> Result<()> {
    let (_, pipeline) = load(file, &store_from_env()?)?;
    println!("Pipeline '{}' ({} stages)", pipeline.name(), pipeline.stage_count());
    for (i, level) in pipeline.levels().iter().enumerate() {
        println!("  {}. {}", i + 1, level.join(", "));
    }
    Ok(())
}

fn validate(file: &Path) -> Result<()> {
    let (spec, pipeline) = load(file, &store_from_env()?)?;
    let secrets = spec.secret_store()?;
    let mut missing = Vec::new();
    for stage in pipeline.stages() {
        for secret in &stage.secrets {
            if secrets.get(&secret.name).is_none() {
                missing.push(format!("{} ({})", secret.name, stage.name));
            }
        }
    }
    if !missing.is_empty() {
        missing.sort();
        warn!(secrets = %missing.join(", "), "Secrets without a value in the current environment");
    }
    println!("Pipeline '{}' is valid ({} stages)", pipeline.name(), pipeline.stage_count());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Commands::Run {
            file,
            runtime,
            parallel,
            timeout,
            artifacts,
            secrets,
            json,
        } => run(file, runtime, parallel, timeout, artifacts, secrets, json).await,
        Commands::Plan { file } => plan(&file).map(|()| ExitCode::SUCCESS),
        Commands::Validate { file } => validate(&file).map(|()| ExitCode::SUCCESS),
    }
}

//! # Dockhand
//!
//! Dependency-ordered pipelines whose stages run in isolated container
//! environments.
//!
//! Dockhand provides:
//!
//! - **Stage DAGs**: stages declare dependencies; cycles and unknown
//!   references are rejected before anything runs
//! - **Bounded parallelism**: independent stages run concurrently up to a limit
//! - **Scoped secrets**: values are bound per stage and redacted from output
//! - **Artifact hand-off**: declared outputs are exported to the host and can
//!   be mounted into later stages
//! - **Cancellation**: the first failure or a caller-issued cancel stops the run
//!   and tears down every environment
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dockhand::prelude::*;
//! use std::sync::Arc;
//!
//! let pipeline = PipelineBuilder::new("site")
//!     .stage(StageSpec::new("build", "node:20-alpine").with_command("npm run build"))?
//!     .stage(StageSpec::new("publish", "alpine:3.20").with_dependency("build"))?
//!     .build()?;
//!
//! let executor = StageExecutor::new(Arc::new(HostRuntime::new()), Arc::new(ArtifactStore::new(".dockhand")));
//! let runner = PipelineRunner::new(Arc::new(executor), RunnerConfig::default());
//! let report = runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod runtime;
pub mod secrets;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::ArtifactStore;
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{PipelineFile, RunnerConfig};
    pub use crate::context::RunContext;
    pub use crate::core::{ArtifactRecord, ExecutionResult, PipelineReport, PipelineStatus, StageStatus};
    pub use crate::errors::DockhandError;
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::StageExecutor;
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{Mount, OutputSpec, Pipeline, PipelineBuilder, PipelineRunner, RetryConfig, StageSpec};
    #[cfg(feature = "docker")]
    pub use crate::runtime::DockerRuntime;
    pub use crate::runtime::{ContainerRuntime, HostRuntime};
    pub use crate::secrets::{SecretSource, SecretStore, SecretValue};
}

//! Execution environments for stages.
//!
//! A [`ContainerRuntime`] creates one isolated environment per stage run,
//! executes commands in it, copies outputs out of it and destroys it. The
//! executor drives these steps; runtimes never see the pipeline.

#[cfg(feature = "docker")]
mod docker;
mod host;

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
pub use host::HostRuntime;

use crate::errors::DockhandError;
use crate::pipeline::Mount;
use crate::secrets::SecretValue;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Label key carrying the stage name on created environments.
pub const STAGE_LABEL: &str = "dockhand.stage";

/// Everything a runtime needs to create an environment.
#[derive(Debug, Clone)]
pub struct EnvironmentSpec {
    /// Stage the environment is for.
    pub stage: String,
    /// Image reference.
    pub image: String,
    /// Working directory inside the environment.
    pub workdir: String,
    /// Host paths to mount.
    pub mounts: Vec<Mount>,
    /// Labels attached to the environment.
    pub labels: BTreeMap<String, String>,
}

/// Opaque reference to a prepared environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvironmentHandle {
    /// Runtime-specific ID (container ID, scratch directory key).
    pub id: String,
    /// Stage the environment belongs to.
    pub stage: String,
    /// Image the environment was created from.
    pub image: String,
}

/// An environment variable value passed to one command.
#[derive(Debug, Clone)]
pub enum EnvValue {
    /// A plain value.
    Plain(String),
    /// A secret; only [`SecretValue::expose`] reveals it.
    Secret(SecretValue),
}

impl EnvValue {
    /// Returns the raw value for handing to the process.
    #[must_use]
    pub fn expose(&self) -> &str {
        match self {
            Self::Plain(v) => v,
            Self::Secret(v) => v.expose(),
        }
    }

    /// Returns true for secret values.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }
}

/// One command to run inside an environment.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Shell command line, run with `sh -c`.
    pub command: String,
    /// Working directory inside the environment.
    pub workdir: String,
    /// Environment variables, in the order they are applied.
    pub env: Vec<(String, EnvValue)>,
}

/// Result of one command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Process exit code.
    pub exit_code: i64,
    /// Combined stdout and stderr, unredacted.
    pub output: String,
}

/// A backend that runs stages in isolated environments.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Obtains the image and creates a running environment.
    ///
    /// Failures are reported as [`DockhandError::EnvironmentSetup`]; the
    /// `transient` flag marks failures worth retrying.
    async fn prepare(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, DockhandError>;

    /// Runs one command and waits for it to exit.
    async fn exec(&self, handle: &EnvironmentHandle, request: &ExecRequest) -> Result<ExecOutput, DockhandError>;

    /// Copies `path` from the environment to `destination` on the host.
    ///
    /// `destination` does not exist when this is called. A missing `path`
    /// is reported as [`DockhandError::ArtifactNotFound`].
    async fn export(&self, handle: &EnvironmentHandle, path: &str, destination: &Path) -> Result<(), DockhandError>;

    /// Destroys the environment. Must tolerate environments that are
    /// already gone.
    async fn teardown(&self, handle: &EnvironmentHandle) -> Result<(), DockhandError>;
}

//! Stage specifications.

use crate::errors::PipelineValidationError;
use crate::utils::{is_absolute_container_path, is_valid_env_name};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default working directory inside an execution environment.
pub const DEFAULT_WORKDIR: &str = "/workspace";

/// A host path made available inside the execution environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Path on the host.
    pub source: PathBuf,
    /// Absolute path inside the environment.
    pub target: String,
    /// Whether the stage may only read the mount.
    pub read_only: bool,
}

impl Mount {
    /// Creates a read-write mount.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Marks the mount read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Explicit mapping from a secret name to the environment variable that
/// receives its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    /// Name of the secret in the [`SecretStore`](crate::secrets::SecretStore).
    pub name: String,
    /// Target environment variable.
    pub env: String,
}

/// A directory or file the stage produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Absolute path inside the environment.
    pub path: String,
    /// Host destination; defaults to the artifact store's stage directory.
    pub destination: Option<PathBuf>,
}

impl OutputSpec {
    /// Creates an output exported to the default location.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            destination: None,
        }
    }

    /// Sets an explicit host destination.
    #[must_use]
    pub fn to(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Name used under the stage's artifact directory when no destination
    /// is set.
    #[must_use]
    pub fn default_name(&self) -> PathBuf {
        Path::new(&self.path)
            .file_name()
            .map_or_else(|| PathBuf::from("output"), PathBuf::from)
    }
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Working directory inside the environment.
    pub workdir: String,
    /// Host paths mounted into the environment.
    pub mounts: Vec<Mount>,
    /// Shell commands run in order.
    pub commands: Vec<String>,
    /// Names of stages this stage depends on.
    pub dependencies: BTreeSet<String>,
    /// Plain environment variables.
    pub env: BTreeMap<String, String>,
    /// Secrets injected as environment variables.
    pub secrets: Vec<SecretRef>,
    /// Outputs exported after the commands succeed.
    pub outputs: Vec<OutputSpec>,
    /// Per-stage timeout; the runner default applies when unset.
    pub timeout: Option<Duration>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            workdir: DEFAULT_WORKDIR.to_string(),
            mounts: Vec::new(),
            commands: Vec::new(),
            dependencies: BTreeSet::new(),
            env: BTreeMap::new(),
            secrets: Vec::new(),
            outputs: Vec::new(),
            timeout: None,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Adds a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Appends a command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Appends several commands.
    #[must_use]
    pub fn with_commands(mut self, commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Sets a plain environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Binds secret `name` to environment variable `env`.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, env: impl Into<String>) -> Self {
        self.secrets.push(SecretRef {
            name: name.into(),
            env: env.into(),
        });
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    /// Sets the stage timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validates the stage specification in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or image is empty, the stage depends on
    /// itself, an environment variable name is invalid or bound twice, a
    /// container path is relative, or two outputs export to the same place.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let fail = |message: String| {
            Err(PipelineValidationError::new(message).with_stages(vec![self.name.clone()]))
        };

        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if self.image.trim().is_empty() {
            return fail(format!("Stage '{}' has no image", self.name));
        }
        if self.dependencies.contains(&self.name) {
            return fail(format!("Stage '{}' cannot depend on itself", self.name));
        }
        if !is_absolute_container_path(&self.workdir) {
            return fail(format!(
                "Stage '{}' working directory '{}' must be absolute",
                self.name, self.workdir
            ));
        }

        for key in self.env.keys() {
            if !is_valid_env_name(key) {
                return fail(format!(
                    "Stage '{}' has invalid environment variable name '{}'",
                    self.name, key
                ));
            }
        }

        let mut secret_targets = HashSet::new();
        for secret in &self.secrets {
            if !is_valid_env_name(&secret.env) {
                return fail(format!(
                    "Stage '{}' binds secret '{}' to invalid variable name '{}'",
                    self.name, secret.name, secret.env
                ));
            }
            if !secret_targets.insert(secret.env.as_str()) {
                return fail(format!(
                    "Stage '{}' binds more than one secret to '{}'",
                    self.name, secret.env
                ));
            }
        }

        for mount in &self.mounts {
            if !is_absolute_container_path(&mount.target) {
                return fail(format!(
                    "Stage '{}' mount target '{}' must be absolute",
                    self.name, mount.target
                ));
            }
        }
        let mut destinations = HashSet::new();
        for output in &self.outputs {
            if !is_absolute_container_path(&output.path) {
                return fail(format!(
                    "Stage '{}' output '{}' must be absolute",
                    self.name, output.path
                ));
            }
            let destination = match &output.destination {
                Some(path) => (true, path.clone()),
                None => (false, output.default_name()),
            };
            if !destinations.insert(destination) {
                return fail(format!(
                    "Stage '{}' has more than one output exported to the same place as '{}'",
                    self.name, output.path
                ));
            }
        }

        Ok(())
    }
}

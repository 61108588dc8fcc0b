//! YAML pipeline definitions.
//!
//! ```yaml
//! name: site
//! secrets:
//!   registry_token: { env: REGISTRY_TOKEN }
//! stages:
//!   - name: build
//!     image: node:20-alpine
//!     mounts: ["./site:/workspace/src:ro"]
//!     commands: ["cp -r src dist"]
//!     outputs: ["/workspace/dist"]
//!   - name: publish
//!     image: alpine:3.20
//!     inputs: [{ from: build, path: /workspace/in }]
//!     secrets: { TOKEN: registry_token }
//!     commands: ["ls /workspace/in/dist"]
//! ```

use crate::artifacts::ArtifactStore;
use crate::errors::DockhandError;
use crate::pipeline::{Mount, OutputSpec, Pipeline, PipelineBuilder, StageSpec, DEFAULT_WORKDIR};
use crate::secrets::{SecretSource, SecretStore};
use crate::utils::fs::resolve_path;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A mount as written in YAML: `"src:dst[:ro]"` or a mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MountEntry {
    /// `source:target` with an optional `:ro` suffix.
    Short(String),
    /// Explicit fields.
    Full(MountFields),
}

/// The mapping form of a mount.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountFields {
    /// Host path.
    pub source: PathBuf,
    /// Container path.
    pub target: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl MountEntry {
    fn resolve(&self, base_dir: &Path) -> Result<Mount, DockhandError> {
        let (source, target, read_only) = match self {
            Self::Short(text) => {
                let (rest, read_only) = match text.strip_suffix(":ro") {
                    Some(rest) => (rest, true),
                    None => (text.strip_suffix(":rw").unwrap_or(text), false),
                };
                let (source, target) = rest
                    .split_once(':')
                    .ok_or_else(|| DockhandError::Config(format!("mount '{text}' must be 'source:target'")))?;
                (PathBuf::from(source), target.to_string(), read_only)
            }
            Self::Full(fields) => (fields.source.clone(), fields.target.clone(), fields.read_only),
        };

        let mount = Mount::new(resolve_path(base_dir, &source)?, target);
        Ok(if read_only { mount.read_only() } else { mount })
    }
}

/// An output as written in YAML: a container path or a mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputEntry {
    /// Export to the default location.
    Path(String),
    /// Export to an explicit host path.
    Full(OutputFields),
}

/// The mapping form of an output.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputFields {
    /// Container path.
    pub path: String,
    /// Host destination.
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

/// Mounts another stage's exported outputs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputEntry {
    /// The producing stage. Becomes a dependency.
    pub from: String,
    /// Where the outputs appear in this stage.
    pub path: String,
}

/// One stage in a pipeline file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageEntry {
    /// Unique stage name.
    pub name: String,
    /// Container image.
    pub image: String,
    /// Working directory inside the environment.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Host directories to mount.
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
    /// Shell commands, run in order.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Stages that must succeed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Plain environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// `ENV_VAR: secret_name` bindings.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Paths exported after the commands succeed.
    #[serde(default)]
    pub outputs: Vec<OutputEntry>,
    /// Outputs of earlier stages to mount.
    #[serde(default)]
    pub inputs: Vec<InputEntry>,
    /// Per-stage timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StageEntry {
    fn into_spec(self, base_dir: &Path, artifacts: &ArtifactStore) -> Result<StageSpec, DockhandError> {
        let mut spec = StageSpec::new(self.name, self.image)
            .with_workdir(self.workdir.unwrap_or_else(|| DEFAULT_WORKDIR.to_string()))
            .with_commands(self.commands)
            .with_dependencies(self.depends_on);

        for mount in &self.mounts {
            spec = spec.with_mount(mount.resolve(base_dir)?);
        }
        for input in self.inputs {
            spec = spec
                .with_mount(artifacts.import(&input.from, input.path))
                .with_dependency(input.from);
        }
        for (key, value) in self.env {
            spec = spec.with_env(key, value);
        }
        for (env, secret) in self.secrets {
            spec = spec.with_secret(secret, env);
        }
        for output in self.outputs {
            spec = spec.with_output(match output {
                OutputEntry::Path(path) | OutputEntry::Full(OutputFields { path, destination: None }) => {
                    OutputSpec::new(path)
                }
                OutputEntry::Full(OutputFields {
                    path,
                    destination: Some(dest),
                }) => OutputSpec::new(path).to(resolve_path(base_dir, &dest)?),
            });
        }
        if let Some(secs) = self.timeout_secs {
            spec = spec.with_timeout(Duration::from_secs(secs));
        }
        Ok(spec)
    }
}

/// A pipeline loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    /// Pipeline name.
    pub name: String,
    /// Stages in any order.
    pub stages: Vec<StageEntry>,
    /// Named secret sources.
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretSource>,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl PipelineFile {
    /// Reads and parses a pipeline file. Relative paths inside it resolve
    /// against the file's directory, which is made absolute.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Config`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DockhandError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DockhandError::Config(format!("cannot read pipeline file '{}': {e}", path.display())))?;
        let mut file = Self::from_yaml_str(&content)
            .map_err(|e| DockhandError::Config(format!("{}: {e}", path.display())))?;
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        file.base_dir = resolve_path(Path::new("."), parent)?;
        Ok(file)
    }

    /// Parses a pipeline definition. Relative paths resolve against the
    /// current directory.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Config`] on invalid YAML or unknown fields.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DockhandError> {
        let mut file: Self =
            serde_yaml::from_str(yaml).map_err(|e| DockhandError::Config(format!("invalid pipeline: {e}")))?;
        file.base_dir = PathBuf::from(".");
        Ok(file)
    }

    /// Overrides the directory relative paths resolve against.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// The directory relative paths resolve against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Builds and validates the pipeline.
    ///
    /// `inputs` become read-only mounts of the producing stage's directory
    /// in `artifacts`, plus a dependency on that stage.
    ///
    /// # Errors
    ///
    /// Returns validation, cycle or configuration errors.
    pub fn into_pipeline(self, artifacts: &ArtifactStore) -> Result<Pipeline, DockhandError> {
        let mut builder = PipelineBuilder::new(self.name);
        for entry in self.stages {
            builder.add_stage(entry.into_spec(&self.base_dir, artifacts)?)?;
        }
        builder.build()
    }

    /// Resolves the declared secret sources. Relative file paths resolve
    /// against the base directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a secret file cannot be read.
    pub fn secret_store(&self) -> Result<SecretStore, DockhandError> {
        let sources: BTreeMap<String, SecretSource> = self
            .secrets
            .iter()
            .map(|(name, source)| {
                let source = match source {
                    SecretSource::File(path) => SecretSource::File(resolve_path(&self.base_dir, path)?),
                    other => other.clone(),
                };
                Ok((name.clone(), source))
            })
            .collect::<Result<_, DockhandError>>()?;
        SecretStore::resolve(&sources)
    }
}

//! Configuration: runner settings and YAML pipeline files.

mod file;
mod runner;

pub use file::{InputEntry, MountEntry, MountFields, OutputEntry, OutputFields, PipelineFile, StageEntry};
pub use runner::{RunnerConfig, ENV_ARTIFACT_ROOT, ENV_MAX_PARALLEL, ENV_STAGE_TIMEOUT};

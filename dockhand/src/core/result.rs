//! Immutable result of one stage execution.

use super::ArtifactRecord;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serializes a [`Duration`] as fractional milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}

/// What a stage produced. Created by the executor and never mutated.
///
/// `output` is already redacted: secret values bound to the stage never
/// appear in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    stage: String,
    exit_code: i64,
    output: String,
    output_location: Option<PathBuf>,
    artifacts: Vec<ArtifactRecord>,
    commands_run: usize,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    duration: Duration,
    started_at: Timestamp,
    finished_at: Timestamp,
}

impl ExecutionResult {
    pub(crate) fn new(
        stage: impl Into<String>,
        exit_code: i64,
        output: String,
        commands_run: usize,
        started_at: Timestamp,
        duration: Duration,
    ) -> Self {
        let finished_at = started_at
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            stage: stage.into(),
            exit_code,
            output,
            output_location: None,
            artifacts: Vec::new(),
            commands_run,
            duration,
            started_at,
            finished_at,
        }
    }

    pub(crate) fn with_artifacts(mut self, artifacts: Vec<ArtifactRecord>) -> Self {
        self.output_location = artifacts.first().map(|a| a.destination.clone());
        self.artifacts = artifacts;
        self
    }

    /// The stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The exit code of the last command run.
    #[must_use]
    pub fn exit_code(&self) -> i64 {
        self.exit_code
    }

    /// Returns true when the stage exited 0.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Captured, redacted stdout and stderr of every command.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Host location of the first exported artifact, if any.
    #[must_use]
    pub fn output_location(&self) -> Option<&Path> {
        self.output_location.as_deref()
    }

    /// Every exported artifact.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// Number of commands that were executed.
    #[must_use]
    pub fn commands_run(&self) -> usize {
        self.commands_run
    }

    /// Wall-clock time spent in the stage.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// When the stage started.
    #[must_use]
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// When the stage finished.
    #[must_use]
    pub fn finished_at(&self) -> Timestamp {
        self.finished_at
    }
}

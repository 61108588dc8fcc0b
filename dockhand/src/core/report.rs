//! Summary of a whole pipeline run.

use super::result::duration_ms;
use super::{ExecutionResult, PipelineStatus, StageStatus};
use crate::errors::DockhandError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// The outcome of one pipeline invocation.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    /// The pipeline name.
    pub pipeline: String,
    /// Unique ID of this run.
    pub run_id: Uuid,
    /// Overall status.
    pub status: PipelineStatus,
    /// Results of the stages that produced one, in completion order.
    pub results: Vec<ExecutionResult>,
    /// Final status of every stage in the pipeline.
    pub stages: BTreeMap<String, StageStatus>,
    /// The stage that caused the pipeline to halt.
    pub failed_stage: Option<String>,
    /// Exit code of the failing stage, when it got that far.
    pub exit_code: Option<i64>,
    /// The most recent stage that completed successfully.
    pub last_completed_stage: Option<String>,
    /// Display form of the first failure.
    pub error: Option<String>,
    /// Total wall-clock time.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    #[serde(skip)]
    pub(crate) failure: Option<DockhandError>,
}

impl PipelineReport {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// Looks up the result of a stage.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.stage() == stage)
    }

    /// Returns the final status of a stage.
    #[must_use]
    pub fn stage_status(&self, stage: &str) -> Option<StageStatus> {
        self.stages.get(stage).copied()
    }

    /// Returns the error that halted the run.
    #[must_use]
    pub fn failure(&self) -> Option<&DockhandError> {
        self.failure.as_ref()
    }

    /// Converts a failed or cancelled report into its first error.
    pub fn into_result(mut self) -> Result<Self, DockhandError> {
        match self.status {
            PipelineStatus::Succeeded => Ok(self),
            PipelineStatus::Cancelled => Err(self
                .failure
                .take()
                .unwrap_or_else(|| DockhandError::Cancelled("cancelled".to_string()))),
            PipelineStatus::Failed => Err(self.failure.take().unwrap_or_else(|| {
                DockhandError::Runtime(
                    self.error
                        .clone()
                        .unwrap_or_else(|| "pipeline failed".to_string()),
                )
            })),
        }
    }
}

//! Error types for dockhand.
//!
//! Every stage-level error carries the identity of the stage it came from so
//! the runner can report the first failure without extra bookkeeping.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The main error type for dockhand operations.
#[derive(Debug, Error)]
pub enum DockhandError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CyclicDependencyError),

    /// A stage finished with a non-zero exit code.
    #[error("{0}")]
    StageFailed(#[from] StageFailedError),

    /// The execution environment could not be created.
    #[error("{0}")]
    EnvironmentSetup(#[from] EnvironmentSetupError),

    /// A command inside a stage exited non-zero.
    #[error("{0}")]
    CommandExecution(#[from] CommandExecutionError),

    /// A referenced secret has no bound value.
    #[error("{0}")]
    MissingSecret(#[from] MissingSecretError),

    /// A declared output did not exist when the stage completed.
    #[error("{0}")]
    ArtifactNotFound(#[from] ArtifactNotFoundError),

    /// A stage exceeded its time budget.
    #[error("{0}")]
    StageTimeout(#[from] StageTimeoutError),

    /// The pipeline was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// The container runtime reported an error outside environment setup.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DockhandError {
    /// Returns the stage this error belongs to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageFailed(e) => Some(&e.stage),
            Self::EnvironmentSetup(e) => Some(&e.stage),
            Self::CommandExecution(e) => Some(&e.stage),
            Self::MissingSecret(e) => Some(&e.stage),
            Self::ArtifactNotFound(e) => Some(&e.stage),
            Self::StageTimeout(e) => Some(&e.stage),
            _ => None,
        }
    }

    /// Returns the exit code associated with the failure, if one is known.
    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            Self::StageFailed(e) => Some(e.exit_code),
            Self::CommandExecution(e) => Some(e.exit_code),
            _ => None,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Only environment setup failures flagged as transient qualify.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EnvironmentSetup(e) if e.transient)
    }

    /// Returns a hint for fixing a pipeline definition error.
    ///
    /// Uses the hint attached to the error, falling back to the default
    /// suggestion for its contract code.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&str> {
        let info = match self {
            Self::Validation(e) => e.error_info.as_ref()?,
            Self::CyclicDependency(e) => &e.error_info,
            _ => return None,
        };
        info.fix_hint.as_deref().or_else(|| ContractSuggestions::get(&info.code))
    }

    /// Returns a short machine-readable kind for reports and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::CyclicDependency(_) => "cyclic_dependency",
            Self::StageFailed(_) => "stage_failed",
            Self::EnvironmentSetup(_) => "environment_setup",
            Self::CommandExecution(_) => "command_execution",
            Self::MissingSecret(_) => "missing_secret",
            Self::ArtifactNotFound(_) => "artifact_not_found",
            Self::StageTimeout(_) => "stage_timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Runtime(_) => "runtime",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the dependency graph.
#[derive(Debug, Clone, Error)]
#[error("Cyclic dependency in pipeline: {}", cycle_path.join(" -> "))]
pub struct CyclicDependencyError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CyclicDependencyError {
    /// Creates a new cyclic dependency error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// A stage finished unsuccessfully. Wraps the underlying cause.
#[derive(Debug, Error)]
#[error("Stage '{stage}' failed with exit code {exit_code}: {reason}")]
pub struct StageFailedError {
    /// The failing stage.
    pub stage: String,
    /// The exit code reported by the stage.
    pub exit_code: i64,
    /// Redacted description of the failure.
    pub reason: String,
    /// Last lines of redacted output, when the stage got far enough to run.
    pub output_tail: String,
}

impl StageFailedError {
    /// Creates a new stage failed error.
    #[must_use]
    pub fn new(stage: impl Into<String>, exit_code: i64, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            exit_code,
            reason: reason.into(),
            output_tail: String::new(),
        }
    }

    /// Attaches the tail of the stage's output.
    #[must_use]
    pub fn with_output_tail(mut self, tail: impl Into<String>) -> Self {
        self.output_tail = tail.into();
        self
    }
}

impl From<CommandExecutionError> for StageFailedError {
    fn from(e: CommandExecutionError) -> Self {
        Self::new(&e.stage, e.exit_code, format!("command #{} `{}` failed", e.command_index, e.command))
            .with_output_tail(e.output_tail)
    }
}

/// The execution environment for a stage could not be obtained or started.
#[derive(Debug, Clone, Error)]
#[error("Environment setup failed for stage '{stage}' (image '{image}'): {reason}")]
pub struct EnvironmentSetupError {
    /// The stage being prepared.
    pub stage: String,
    /// The image reference.
    pub image: String,
    /// What went wrong.
    pub reason: String,
    /// Whether the failure may clear up on retry (daemon hiccup, registry 5xx).
    pub transient: bool,
}

impl EnvironmentSetupError {
    /// Creates a permanent setup error.
    #[must_use]
    pub fn new(stage: impl Into<String>, image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            image: image.into(),
            reason: reason.into(),
            transient: false,
        }
    }

    /// Marks the error as transient.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// A command inside a stage exited non-zero.
#[derive(Debug, Clone, Error)]
#[error("Command #{command_index} in stage '{stage}' exited with code {exit_code}: {command}")]
pub struct CommandExecutionError {
    /// The stage running the command.
    pub stage: String,
    /// Zero-based index of the failing command.
    pub command_index: usize,
    /// The command text (redacted).
    pub command: String,
    /// The exit code.
    pub exit_code: i64,
    /// Last lines of redacted output.
    pub output_tail: String,
}

/// A stage references a secret that has no value.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' references secret '{name}' which has no bound value")]
pub struct MissingSecretError {
    /// The stage referencing the secret.
    pub stage: String,
    /// The secret name.
    pub name: String,
}

impl MissingSecretError {
    /// Creates a new missing secret error.
    #[must_use]
    pub fn new(stage: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            name: name.into(),
        }
    }
}

/// A declared output path was absent at stage completion.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' declared output '{path}' but it does not exist")]
pub struct ArtifactNotFoundError {
    /// The stage that declared the output.
    pub stage: String,
    /// The path inside the environment.
    pub path: String,
}

impl ArtifactNotFoundError {
    /// Creates a new artifact not found error.
    #[must_use]
    pub fn new(stage: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            path: path.into(),
        }
    }
}

/// A stage did not finish within its time budget.
#[derive(Debug, Clone, Error)]
#[error("Stage '{}' timed out after {}s", stage, timeout.as_secs_f64())]
pub struct StageTimeoutError {
    /// The stage that timed out.
    pub stage: String,
    /// The budget that expired.
    pub timeout: Duration,
}

impl StageTimeoutError {
    /// Creates a new timeout error.
    #[must_use]
    pub fn new(stage: impl Into<String>, timeout: Duration) -> Self {
        Self {
            stage: stage.into(),
            timeout,
        }
    }
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-004-CYCLE" => Some(
                "Check your stage dependencies for circular references. \
                 Use a linear chain or fan-out pattern instead.",
            ),
            "CONTRACT-004-MISSING_DEP" => Some(
                "Ensure all dependencies reference stages that exist in the pipeline. \
                 Check for typos in stage names.",
            ),
            "CONTRACT-004-DUPLICATE" => Some(
                "Stage names must be unique within a pipeline. Rename one of the stages.",
            ),
            "CONTRACT-004-EMPTY" => Some("Add at least one stage to the pipeline before building."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
    }

    #[test]
    fn test_cyclic_dependency_error() {
        let err = CyclicDependencyError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.error_info.code, "CONTRACT-004-CYCLE");
    }

    #[test]
    fn test_stage_accessor() {
        let err: DockhandError = MissingSecretError::new("publish", "REGISTRY_TOKEN").into();
        assert_eq!(err.stage(), Some("publish"));
        assert_eq!(err.kind(), "missing_secret");
        assert!(err.exit_code().is_none());

        let err: DockhandError = StageFailedError::new("build", 2, "boom").into();
        assert_eq!(err.exit_code(), Some(2));
    }

    #[test]
    fn test_command_error_becomes_stage_failure() {
        let cmd = CommandExecutionError {
            stage: "build".to_string(),
            command_index: 1,
            command: "make".to_string(),
            exit_code: 2,
            output_tail: "error: no rule".to_string(),
        };
        let failed = StageFailedError::from(cmd);

        assert_eq!(failed.exit_code, 2);
        assert_eq!(failed.output_tail, "error: no rule");
        assert_eq!(
            failed.to_string(),
            "Stage 'build' failed with exit code 2: command #1 `make` failed"
        );
    }

    #[test]
    fn test_transient_classification() {
        let permanent: DockhandError =
            EnvironmentSetupError::new("build", "alpine", "manifest unknown").into();
        let transient: DockhandError =
            EnvironmentSetupError::new("build", "alpine", "connection reset").transient().into();
        let timeout: DockhandError = StageTimeoutError::new("build", Duration::from_secs(5)).into();

        assert!(!permanent.is_transient());
        assert!(transient.is_transient());
        assert!(!timeout.is_transient());
    }

    #[test]
    fn test_timeout_message() {
        let err = StageTimeoutError::new("lint", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Stage 'lint' timed out after 1.5s");
    }

    #[test]
    fn test_fix_hint_falls_back_to_suggestion() {
        let bare: DockhandError = PipelineValidationError::new("Unknown dependency")
            .with_error_info(ContractErrorInfo::new("CONTRACT-004-MISSING_DEP", "missing"))
            .into();
        assert_eq!(bare.fix_hint(), ContractSuggestions::get("CONTRACT-004-MISSING_DEP"));

        let cycle: DockhandError = CyclicDependencyError::new(vec!["a".into(), "a".into()]).into();
        assert_eq!(cycle.fix_hint(), Some("Remove one of the dependencies in the cycle to break it."));

        assert!(DockhandError::Config("x".into()).fix_hint().is_none());
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get("CONTRACT-004-CYCLE").is_some());
        assert!(ContractSuggestions::get("CONTRACT-004-DUPLICATE").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }
}

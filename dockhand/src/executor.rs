//! Runs one stage inside a fresh environment.

use crate::artifacts::ArtifactStore;
use crate::cancellation::CancellationToken;
use crate::core::{ArtifactRecord, ExecutionResult};
use crate::errors::{CommandExecutionError, DockhandError, StageTimeoutError};
use crate::pipeline::StageSpec;
use crate::runtime::{ContainerRuntime, EnvValue, EnvironmentHandle, EnvironmentSpec, ExecRequest, STAGE_LABEL};
use crate::secrets::{Redactor, SecretBinding};
use crate::utils::now_utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Number of output lines kept on a failed command.
pub const OUTPUT_TAIL_LINES: usize = 20;

/// Executes stages against a [`ContainerRuntime`].
#[derive(Debug, Clone)]
pub struct StageExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    artifacts: Arc<ArtifactStore>,
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, artifacts: Arc<ArtifactStore>) -> Self {
        Self { runtime, artifacts }
    }

    /// The runtime stages execute on.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// The artifact store outputs are exported to.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Prepares an environment, runs the stage's commands in order, exports
    /// its outputs and tears the environment down.
    ///
    /// The first command exiting non-zero stops the stage; no outputs are
    /// exported in that case. The environment is torn down on every path,
    /// including errors, timeout and cancellation. Captured output is
    /// redacted against `bindings` before it leaves this function.
    ///
    /// # Errors
    ///
    /// - [`DockhandError::Validation`] if two outputs share a destination
    /// - [`DockhandError::EnvironmentSetup`] if the environment cannot be created
    /// - [`DockhandError::CommandExecution`] if a command exits non-zero
    /// - [`DockhandError::ArtifactNotFound`] if a declared output is missing
    /// - [`DockhandError::StageTimeout`] if `timeout` expires
    /// - [`DockhandError::Cancelled`] if `cancel` fires
    pub async fn execute(
        &self,
        stage: &StageSpec,
        bindings: &[SecretBinding],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<ExecutionResult, DockhandError> {
        self.artifacts.check_destinations(stage)?;

        let started_at = now_utc();
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let redactor = Redactor::new(bindings);

        let spec = EnvironmentSpec {
            stage: stage.name.clone(),
            image: stage.image.clone(),
            workdir: stage.workdir.clone(),
            mounts: stage.mounts.clone(),
            labels: BTreeMap::from([(STAGE_LABEL.to_string(), stage.name.clone())]),
        };

        let handle = guarded(stage, cancel, deadline, timeout, self.runtime.prepare(&spec)).await?;
        debug!(stage = %stage.name, runtime = self.runtime.name(), env = %handle.id, "Environment ready");

        let outcome = guarded(
            stage,
            cancel,
            deadline,
            timeout,
            self.run_commands(stage, &handle, bindings, &redactor),
        )
        .await;

        if let Err(e) = self.runtime.teardown(&handle).await {
            warn!(stage = %stage.name, env = %handle.id, error = %e, "Failed to tear down environment");
        }

        let (output, artifacts) = outcome?;
        Ok(ExecutionResult::new(
            &stage.name,
            0,
            output,
            stage.commands.len(),
            started_at,
            start.elapsed(),
        )
        .with_artifacts(artifacts))
    }

    async fn run_commands(
        &self,
        stage: &StageSpec,
        handle: &EnvironmentHandle,
        bindings: &[SecretBinding],
        redactor: &Redactor,
    ) -> Result<(String, Vec<ArtifactRecord>), DockhandError> {
        let env = exec_env(stage, bindings);
        let mut output = String::new();

        for (index, command) in stage.commands.iter().enumerate() {
            let shown = redactor.redact(command);
            debug!(stage = %stage.name, index, command = %shown, "Running command");
            output.push_str("$ ");
            output.push_str(&shown);
            output.push('\n');

            let request = ExecRequest {
                command: command.clone(),
                workdir: stage.workdir.clone(),
                env: env.clone(),
            };
            let result = self.runtime.exec(handle, &request).await?;

            let text = redactor.redact(&result.output);
            output.push_str(&text);
            if !text.is_empty() && !text.ends_with('\n') {
                output.push('\n');
            }

            if result.exit_code != 0 {
                return Err(CommandExecutionError {
                    stage: stage.name.clone(),
                    command_index: index,
                    command: shown,
                    exit_code: result.exit_code,
                    output_tail: tail_lines(&output, OUTPUT_TAIL_LINES),
                }
                .into());
            }
        }

        let mut artifacts = Vec::with_capacity(stage.outputs.len());
        for spec in &stage.outputs {
            artifacts.push(self.artifacts.export(self.runtime.as_ref(), handle, spec).await?);
        }

        Ok((output, artifacts))
    }
}

/// Plain variables first, then secrets, so a secret wins on a name clash.
fn exec_env(stage: &StageSpec, bindings: &[SecretBinding]) -> Vec<(String, EnvValue)> {
    stage
        .env
        .iter()
        .map(|(k, v)| (k.clone(), EnvValue::Plain(v.clone())))
        .chain(
            bindings
                .iter()
                .map(|b| (b.env.clone(), EnvValue::Secret(b.value.clone()))),
        )
        .collect()
}

/// Runs `fut` until it completes, `cancel` fires or `deadline` passes.
async fn guarded<T>(
    stage: &StageSpec,
    cancel: &CancellationToken,
    deadline: tokio::time::Instant,
    timeout: Duration,
    fut: impl Future<Output = Result<T, DockhandError>>,
) -> Result<T, DockhandError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DockhandError::Cancelled(
            cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
        )),
        result = tokio::time::timeout_at(deadline, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(StageTimeoutError::new(&stage.name, timeout).into()),
        },
    }
}

/// Returns the last `n` lines of `text`.
#[must_use]
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

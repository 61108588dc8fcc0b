//! Scripted in-memory runtime.

use crate::errors::{ArtifactNotFoundError, DockhandError, EnvironmentSetupError};
use crate::runtime::{ContainerRuntime, EnvironmentHandle, EnvironmentSpec, ExecOutput, ExecRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One recorded `exec` call.
#[derive(Debug, Clone)]
pub struct ExecCall {
    /// Stage the command ran in.
    pub stage: String,
    /// The command.
    pub command: String,
    /// Environment variables with exposed values.
    pub env: Vec<(String, String)>,
}

impl ExecCall {
    /// Looks up a variable passed to the command.
    #[must_use]
    pub fn env_value(&self, name: &str) -> Option<String> {
        self.env.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }
}

#[derive(Debug, Clone)]
struct Script {
    exit_code: i64,
    output: String,
}

#[derive(Debug, Clone, Copy)]
struct SetupFailure {
    transient: bool,
    remaining: usize,
}

/// A [`ContainerRuntime`] whose behavior is configured per command.
///
/// Unscripted commands exit 0 with no output. `export` succeeds only for
/// paths registered with [`MockRuntime::produces`] and writes a single file
/// named `artifact.txt` into the destination.
#[derive(Debug, Default)]
pub struct MockRuntime {
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    produced: HashSet<(String, String)>,
    setup_failures: Mutex<HashMap<String, SetupFailure>>,
    calls: Mutex<Vec<ExecCall>>,
    prepared: Mutex<Vec<String>>,
    live: Mutex<HashMap<String, String>>,
    max_live: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockRuntime {
    /// Creates a runtime where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the exit code and output of `command`.
    #[must_use]
    pub fn on_command(mut self, command: impl Into<String>, exit_code: i64, output: impl Into<String>) -> Self {
        self.scripts.insert(
            command.into(),
            Script {
                exit_code,
                output: output.into(),
            },
        );
        self
    }

    /// Makes `command` take `delay` before returning.
    #[must_use]
    pub fn with_delay(mut self, command: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(command.into(), delay);
        self
    }

    /// Declares that `stage` produces `path`.
    #[must_use]
    pub fn produces(mut self, stage: impl Into<String>, path: impl Into<String>) -> Self {
        self.produced.insert((stage.into(), path.into()));
        self
    }

    /// Makes the next `times` prepares of `stage` fail.
    #[must_use]
    pub fn fail_setup(self, stage: impl Into<String>, transient: bool, times: usize) -> Self {
        self.setup_failures.lock().insert(
            stage.into(),
            SetupFailure {
                transient,
                remaining: times,
            },
        );
        self
    }

    /// Every exec call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }

    /// Commands run for `stage`, in order.
    #[must_use]
    pub fn commands_for(&self, stage: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.stage == stage)
            .map(|c| c.command.clone())
            .collect()
    }

    /// Stages whose environment was prepared successfully, in order.
    #[must_use]
    pub fn prepared_stages(&self) -> Vec<String> {
        self.prepared.lock().clone()
    }

    /// Environments that have not been torn down.
    #[must_use]
    pub fn live_environments(&self) -> usize {
        self.live.lock().len()
    }

    /// Highest number of environments alive at the same time.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn prepare(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, DockhandError> {
        {
            let mut failures = self.setup_failures.lock();
            if let Some(failure) = failures.get_mut(&spec.stage) {
                if failure.remaining > 0 {
                    failure.remaining -= 1;
                    let err = EnvironmentSetupError::new(&spec.stage, &spec.image, "scripted setup failure");
                    return Err(if failure.transient { err.transient() } else { err }.into());
                }
            }
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        {
            let mut live = self.live.lock();
            live.insert(id.clone(), spec.stage.clone());
            self.max_live.fetch_max(live.len(), Ordering::SeqCst);
        }
        self.prepared.lock().push(spec.stage.clone());

        Ok(EnvironmentHandle {
            id,
            stage: spec.stage.clone(),
            image: spec.image.clone(),
        })
    }

    async fn exec(&self, handle: &EnvironmentHandle, request: &ExecRequest) -> Result<ExecOutput, DockhandError> {
        self.calls.lock().push(ExecCall {
            stage: handle.stage.clone(),
            command: request.command.clone(),
            env: request
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.expose().to_string()))
                .collect(),
        });

        if let Some(delay) = self.delays.get(&request.command) {
            tokio::time::sleep(*delay).await;
        }

        Ok(self
            .scripts
            .get(&request.command)
            .map_or_else(ExecOutput::default, |script| ExecOutput {
                exit_code: script.exit_code,
                output: script.output.clone(),
            }))
    }

    async fn export(&self, handle: &EnvironmentHandle, path: &str, destination: &Path) -> Result<(), DockhandError> {
        if !self.produced.contains(&(handle.stage.clone(), path.to_string())) {
            return Err(ArtifactNotFoundError::new(&handle.stage, path).into());
        }
        std::fs::create_dir_all(destination)?;
        std::fs::write(destination.join("artifact.txt"), format!("{}:{path}", handle.stage))?;
        Ok(())
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> Result<(), DockhandError> {
        self.live.lock().remove(&handle.id);
        Ok(())
    }
}

//! Runs stages as local processes in scratch directories.

use super::{ContainerRuntime, EnvironmentHandle, EnvironmentSpec, ExecOutput, ExecRequest};
use crate::errors::{ArtifactNotFoundError, DockhandError, EnvironmentSetupError};
use crate::utils::fs::{copy_tree, under_root};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Default `PATH` handed to stage processes.
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// A runtime that executes commands with the local shell.
///
/// Each environment is a fresh temporary directory standing in for the
/// container filesystem: container paths such as `/workspace/dist` map to
/// `<root>/workspace/dist`, mounts are copied in, and the directory is
/// deleted on teardown. The image is recorded but never pulled. Processes
/// start with a cleared environment holding only `PATH`, `HOME`,
/// `DOCKHAND_ROOT` and the request's variables.
#[derive(Debug, Default)]
pub struct HostRuntime {
    environments: DashMap<String, Arc<TempDir>>,
}

impl HostRuntime {
    /// Creates a host runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of environments that have not been torn down.
    #[must_use]
    pub fn live_environments(&self) -> usize {
        self.environments.len()
    }

    fn root(&self, handle: &EnvironmentHandle) -> Result<Arc<TempDir>, DockhandError> {
        self.environments
            .get(&handle.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DockhandError::Runtime(format!("unknown environment '{}'", handle.id)))
    }
}

#[async_trait]
impl ContainerRuntime for HostRuntime {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn prepare(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, DockhandError> {
        let setup_error = |reason: String| EnvironmentSetupError::new(&spec.stage, &spec.image, reason);

        let root = tempfile::Builder::new()
            .prefix(&format!("dockhand-{}-", spec.stage))
            .tempdir()
            .map_err(|e| setup_error(format!("cannot create scratch directory: {e}")))?;

        let copies: Vec<(PathBuf, PathBuf)> = spec
            .mounts
            .iter()
            .map(|m| (m.source.clone(), under_root(root.path(), &m.target)))
            .collect();
        let workdir = under_root(root.path(), &spec.workdir);

        let root = tokio::task::spawn_blocking(move || -> std::io::Result<TempDir> {
            for (source, target) in &copies {
                copy_tree(source, target).map_err(|e| {
                    std::io::Error::new(e.kind(), format!("mount '{}': {e}", source.display()))
                })?;
            }
            std::fs::create_dir_all(&workdir)?;
            Ok(root)
        })
        .await
        .map_err(|e| setup_error(format!("setup task failed: {e}")))?
        .map_err(|e| setup_error(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        debug!(stage = %spec.stage, root = %root.path().display(), "Prepared host environment");
        self.environments.insert(id.clone(), Arc::new(root));

        Ok(EnvironmentHandle {
            id,
            stage: spec.stage.clone(),
            image: spec.image.clone(),
        })
    }

    async fn exec(&self, handle: &EnvironmentHandle, request: &ExecRequest) -> Result<ExecOutput, DockhandError> {
        let root = self.root(handle)?;
        let workdir = under_root(root.path(), &request.workdir);

        let output = Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&workdir)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()))
            .env("HOME", root.path())
            .env("DOCKHAND_ROOT", root.path())
            .envs(request.env.iter().map(|(k, v)| (k, v.expose())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DockhandError::Runtime(format!("cannot spawn shell: {e}")))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ExecOutput {
            exit_code: output.status.code().map_or(-1, i64::from),
            output: combined,
        })
    }

    async fn export(&self, handle: &EnvironmentHandle, path: &str, destination: &Path) -> Result<(), DockhandError> {
        let root = self.root(handle)?;
        let source = under_root(root.path(), path);
        if !source.exists() {
            return Err(ArtifactNotFoundError::new(&handle.stage, path).into());
        }

        let destination = destination.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&source, &destination))
            .await
            .map_err(|e| DockhandError::Runtime(format!("export task failed: {e}")))??;
        Ok(())
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> Result<(), DockhandError> {
        if let Some((_, root)) = self.environments.remove(&handle.id) {
            // Close explicitly when no exec still holds the directory.
            if let Ok(root) = Arc::try_unwrap(root) {
                root.close()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Mount;
    use crate::runtime::EnvValue;
    use crate::secrets::SecretValue;
    use std::collections::BTreeMap;

    fn spec(mounts: Vec<Mount>) -> EnvironmentSpec {
        EnvironmentSpec {
            stage: "build".to_string(),
            image: "alpine:3.20".to_string(),
            workdir: "/workspace".to_string(),
            mounts,
            labels: BTreeMap::new(),
        }
    }

    fn request(command: &str) -> ExecRequest {
        ExecRequest {
            command: command.to_string(),
            workdir: "/workspace".to_string(),
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_exec_captures_output_and_exit_code() {
        let runtime = HostRuntime::new();
        let handle = runtime.prepare(&spec(Vec::new())).await.unwrap();

        let ok = runtime.exec(&handle, &request("echo hello")).await.unwrap();
        assert_eq!(ok.exit_code, 0);
        assert_eq!(ok.output, "hello\n");

        let failed = runtime.exec(&handle, &request("echo oops >&2; exit 3")).await.unwrap();
        assert_eq!(failed.exit_code, 3);
        assert!(failed.output.contains("oops"));

        runtime.teardown(&handle).await.unwrap();
        assert_eq!(runtime.live_environments(), 0);
    }

    #[tokio::test]
    async fn test_env_is_isolated_and_secrets_are_passed() {
        std::env::set_var("DOCKHAND_HOST_TEST_LEAK", "leaked");
        let runtime = HostRuntime::new();
        let handle = runtime.prepare(&spec(Vec::new())).await.unwrap();

        let mut req = request("echo \"${TOKEN}:${DOCKHAND_HOST_TEST_LEAK:-none}\"");
        req.env.push(("TOKEN".to_string(), EnvValue::Secret(SecretValue::new("abc"))));
        let out = runtime.exec(&handle, &req).await.unwrap();

        assert_eq!(out.output.trim(), "abc:none");
        runtime.teardown(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_mounts_are_copied_and_outputs_exported() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("input.txt"), "data").unwrap();

        let runtime = HostRuntime::new();
        let handle = runtime
            .prepare(&spec(vec![Mount::new(src.path(), "/workspace/src").read_only()]))
            .await
            .unwrap();

        let out = runtime
            .exec(&handle, &request("mkdir -p dist && cp src/input.txt dist/out.txt"))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);

        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("dist");
        runtime.export(&handle, "/workspace/dist", &target).await.unwrap();
        assert_eq!(std::fs::read_to_string(target.join("out.txt")).unwrap(), "data");

        let err = runtime.export(&handle, "/workspace/missing", &dest.path().join("m")).await.unwrap_err();
        assert_eq!(err.kind(), "artifact_not_found");

        runtime.teardown(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_mount_source_is_permanent_setup_error() {
        let runtime = HostRuntime::new();
        let err = runtime
            .prepare(&spec(vec![Mount::new("/definitely/not/here", "/workspace/src")]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "environment_setup");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let runtime = HostRuntime::new();
        let handle = runtime.prepare(&spec(Vec::new())).await.unwrap();
        runtime.teardown(&handle).await.unwrap();
        runtime.teardown(&handle).await.unwrap();
        assert!(runtime.exec(&handle, &request("true")).await.is_err());
    }
}

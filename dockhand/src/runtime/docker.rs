//! Docker Engine runtime built on bollard.
#![allow(deprecated)]

use super::{ContainerRuntime, EnvironmentHandle, EnvironmentSpec, ExecOutput, ExecRequest};
use crate::errors::{ArtifactNotFoundError, DockhandError, EnvironmentSetupError};
use crate::pipeline::Mount;
use crate::utils::fs::resolve_path;
use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Keeps the container alive between exec calls and exits promptly on stop.
const KEEP_ALIVE: &str = "trap 'exit 0' TERM; while :; do sleep 1; done";

/// Splits an image reference into name and tag.
///
/// `"redis:7-alpine"` gives `("redis", "7-alpine")`, `"postgres"` gives
/// `("postgres", "latest")`. A registry port is not mistaken for a tag.
#[must_use]
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}

/// Returns true for errors worth retrying: daemon unreachable or 5xx.
fn is_transient(error: &BollardError) -> bool {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => *status_code >= 500,
        BollardError::IOError { .. } | BollardError::HyperResponseError { .. } | BollardError::RequestTimeoutError => true,
        _ => false,
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(error, BollardError::DockerResponseServerError { status_code: 404, .. })
}

/// Runs each stage in its own Docker container.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local daemon and checks that it answers.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Runtime`] if the daemon is unreachable.
    pub async fn connect() -> Result<Self, DockhandError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockhandError::Runtime(format!("cannot connect to Docker: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| DockhandError::Runtime(format!("Docker daemon is not responding: {e}")))?;
        Ok(Self { docker })
    }

    async fn ensure_image(&self, spec: &EnvironmentSpec) -> Result<(), EnvironmentSetupError> {
        let setup_error = |e: BollardError| {
            let err = EnvironmentSetupError::new(&spec.stage, &spec.image, e.to_string());
            if is_transient(&e) {
                err.transient()
            } else {
                err
            }
        };

        match self.docker.inspect_image(&spec.image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(setup_error(e)),
        }

        info!(stage = %spec.stage, image = %spec.image, "Pulling image");
        let (from_image, tag) = parse_image_tag(&spec.image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(image = %spec.image, %status, "Pull progress");
                    }
                }
                Err(e) => return Err(setup_error(e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn prepare(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle, DockhandError> {
        self.ensure_image(spec).await?;

        let setup_error = |e: BollardError| {
            let err = EnvironmentSetupError::new(&spec.stage, &spec.image, e.to_string());
            if is_transient(&e) {
                err.transient()
            } else {
                err
            }
        };

        let binds = spec
            .mounts
            .iter()
            .map(|m| {
                bind_spec(m).map_err(|e| {
                    EnvironmentSetupError::new(
                        &spec.stage,
                        &spec.image,
                        format!("mount source '{}': {e}", m.source.display()),
                    )
                })
            })
            .collect::<Result<Vec<String>, _>>()?;

        let labels: HashMap<String, String> = spec.labels.clone().into_iter().collect();

        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
            cmd: Some(vec![KEEP_ALIVE.to_string()]),
            working_dir: Some(spec.workdir.clone()),
            labels: Some(labels),
            host_config: Some(HostConfig {
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: format!("dockhand-{}-{}", spec.stage, Uuid::new_v4().simple()),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(setup_error)?;

        let handle = EnvironmentHandle {
            id: created.id,
            stage: spec.stage.clone(),
            image: spec.image.clone(),
        };

        if let Err(e) = self
            .docker
            .start_container(&handle.id, None::<bollard::query_parameters::StartContainerOptions>)
            .await
        {
            let _ = self.teardown(&handle).await;
            return Err(setup_error(e).into());
        }

        debug!(stage = %spec.stage, container = %handle.id, "Started container");
        Ok(handle)
    }

    async fn exec(&self, handle: &EnvironmentHandle, request: &ExecRequest) -> Result<ExecOutput, DockhandError> {
        let runtime_error = |e: BollardError| DockhandError::Runtime(format!("exec in '{}': {e}", handle.stage));

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(key, value)| format!("{key}={}", value.expose()))
            .collect();

        let exec = self
            .docker
            .create_exec(
                &handle.id,
                CreateExecOptions {
                    cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), request.command.clone()]),
                    env: Some(env),
                    working_dir: Some(request.workdir.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(runtime_error)?;

        let mut output = String::new();
        match self
            .docker
            .start_exec(&exec.id, Some(StartExecOptions::default()))
            .await
            .map_err(runtime_error)?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    match chunk.map_err(runtime_error)? {
                        LogOutput::StdOut { message } | LogOutput::StdErr { message } | LogOutput::Console { message } => {
                            output.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(runtime_error)?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn export(&self, handle: &EnvironmentHandle, path: &str, destination: &Path) -> Result<(), DockhandError> {
        let options = DownloadFromContainerOptions { path: path.to_string() };
        let archive = self
            .docker
            .download_from_container(&handle.id, Some(options))
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    DockhandError::from(ArtifactNotFoundError::new(&handle.stage, path))
                } else {
                    DockhandError::Runtime(format!("export '{path}' from '{}': {e}", handle.stage))
                }
            })?;

        let destination = destination.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_single_entry(&archive, &destination))
            .await
            .map_err(|e| DockhandError::Runtime(format!("export task failed: {e}")))??;
        Ok(())
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> Result<(), DockhandError> {
        match self
            .docker
            .remove_container(
                &handle.id,
                Some(bollard::query_parameters::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(DockhandError::Runtime(format!("remove container for '{}': {e}", handle.stage))),
        }
    }
}

/// A `source:target[:ro]` bind. Docker treats a relative source as a volume
/// name, so the source is made absolute first.
fn bind_spec(mount: &Mount) -> std::io::Result<String> {
    let source = resolve_path(Path::new("."), &mount.source)?;
    let mode = if mount.read_only { ":ro" } else { "" };
    Ok(format!("{}:{}{}", source.display(), mount.target, mode))
}

/// Unpacks a `download_from_container` archive so its top-level entry lands
/// at `destination`, which must not exist yet.
///
/// The archive's root is the basename of the requested path; it is unpacked
/// into a sibling scratch directory and renamed into place.
fn unpack_single_entry(archive: &[u8], destination: &Path) -> std::io::Result<()> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new().prefix(".dockhand-export-").tempdir_in(parent)?;

    tar::Archive::new(archive).unpack(staging.path())?;

    let mut entries = std::fs::read_dir(staging.path())?;
    let root = entries
        .next()
        .transpose()?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "empty archive"))?;

    std::fs::rename(root.path(), destination)?;
    Ok(())
}

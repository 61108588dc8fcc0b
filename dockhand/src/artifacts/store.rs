//! Artifact store.

use crate::core::ArtifactRecord;
use crate::errors::{DockhandError, PipelineValidationError};
use crate::pipeline::{Mount, OutputSpec, StageSpec};
use crate::runtime::{ContainerRuntime, EnvironmentHandle};
use crate::utils::fs::{remove_path, resolve_path, walk_files};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;

/// Host directory that receives exported stage outputs.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ArtifactStore {
    /// Creates a store rooted at `root`, made absolute against the current
    /// directory. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            root: resolve_path(Path::new("."), &root).unwrap_or(root),
            locks: DashMap::new(),
        }
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default directory for a stage's outputs.
    #[must_use]
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.root.join(stage)
    }

    /// Where `output` of `stage` will be written.
    #[must_use]
    pub fn destination_for(&self, stage: &str, output: &OutputSpec) -> PathBuf {
        output
            .destination
            .clone()
            .unwrap_or_else(|| self.stage_dir(stage).join(output.default_name()))
    }

    /// Fails if two of `stage`'s outputs resolve to the same host path.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Validation`] naming the shared destination.
    pub fn check_destinations(&self, stage: &StageSpec) -> Result<(), DockhandError> {
        let mut seen = HashSet::new();
        for output in &stage.outputs {
            let destination = self.destination_for(&stage.name, output);
            if !seen.insert(destination.clone()) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' exports more than one output to '{}'",
                    stage.name,
                    destination.display()
                ))
                .with_stages(vec![stage.name.clone()])
                .into());
            }
        }
        Ok(())
    }

    /// A read-only mount exposing `stage`'s exported outputs at
    /// `container_path` in a later stage.
    #[must_use]
    pub fn import(&self, stage: &str, container_path: impl Into<String>) -> Mount {
        Mount::new(self.stage_dir(stage), container_path).read_only()
    }

    /// Copies `output` out of the environment and records what was written.
    ///
    /// Writers targeting the same destination are serialized. The output is
    /// first copied into a staging directory next to the destination; the
    /// previous content is replaced only once that copy succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::ArtifactNotFound`] if the path does not exist
    /// in the environment, or an IO error if the destination cannot be
    /// written. The destination is left untouched in both cases.
    pub async fn export(
        &self,
        runtime: &dyn ContainerRuntime,
        handle: &EnvironmentHandle,
        output: &OutputSpec,
    ) -> Result<ArtifactRecord, DockhandError> {
        let destination = self.destination_for(&handle.stage, output);
        let lock = self
            .locks
            .entry(destination.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let staging = {
            let destination = destination.clone();
            blocking(move || staging_dir(&destination)).await?
        };
        let staged = staging.path().join("export");

        runtime.export(handle, &output.path, &staged).await?;

        let (files, bytes, sha256) = {
            let destination = destination.clone();
            blocking(move || {
                let digest = digest_path(&staged)?;
                remove_path(&destination)?;
                std::fs::rename(&staged, &destination)?;
                staging.close()?;
                Ok(digest)
            })
            .await?
        };

        debug!(
            stage = %handle.stage,
            source = %output.path,
            destination = %destination.display(),
            files,
            bytes,
            "Exported artifact"
        );

        Ok(ArtifactRecord {
            stage: handle.stage.clone(),
            source: output.path.clone(),
            destination,
            files,
            bytes,
            sha256,
        })
    }
}

/// A scratch directory beside `destination`, so the final rename stays on
/// one filesystem.
fn staging_dir(destination: &Path) -> io::Result<TempDir> {
    let parent = destination.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("artifact destination '{}' has no parent", destination.display()),
        )
    })?;
    std::fs::create_dir_all(parent)?;
    tempfile::Builder::new().prefix(".dockhand-export-").tempdir_in(parent)
}

async fn blocking<T, F>(task: F) -> Result<T, DockhandError>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| DockhandError::Runtime(format!("artifact task failed: {e}")))?;
    Ok(result?)
}

/// Counts files and bytes under `path` and computes a SHA-256 digest over
/// each file's relative path, a NUL byte and its contents, in path order.
///
/// # Errors
///
/// Returns an IO error if any file cannot be read.
pub fn digest_path(path: &Path) -> std::io::Result<(usize, u64, String)> {
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;
    let files = walk_files(path)?;

    for (relative, full) in &files {
        let contents = std::fs::read(full)?;
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(&contents);
        bytes += contents.len() as u64;
    }

    Ok((files.len(), bytes, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EnvironmentSpec, HostRuntime};
    use std::collections::BTreeMap;

    fn output(path: &str) -> OutputSpec {
        OutputSpec::new(path)
    }

    #[test]
    fn test_default_destination_uses_stage_dir() {
        let store = ArtifactStore::new("/tmp/artifacts");
        assert_eq!(
            store.destination_for("build", &output("/workspace/dist")),
            PathBuf::from("/tmp/artifacts/build/dist")
        );
        assert_eq!(
            store.destination_for("build", &output("/workspace/dist").to("/srv/site")),
            PathBuf::from("/srv/site")
        );
    }

    #[test]
    fn test_import_is_read_only_mount_of_stage_dir() {
        let store = ArtifactStore::new("/tmp/artifacts");
        let mount = store.import("build", "/inputs/build");
        assert_eq!(mount.source, PathBuf::from("/tmp/artifacts/build"));
        assert_eq!(mount.target, "/inputs/build");
        assert!(mount.read_only);
    }

    #[test]
    fn test_digest_depends_on_names_and_contents() {
        let a = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("x.txt"), "1").unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("y.txt"), "1").unwrap();

        let (files, bytes, digest_a) = digest_path(a.path()).unwrap();
        let (_, _, digest_b) = digest_path(b.path()).unwrap();
        assert_eq!((files, bytes), (1, 1));
        assert_ne!(digest_a, digest_b);
        assert_eq!(digest_a.len(), 64);
    }

    #[tokio::test]
    async fn test_export_replaces_previous_content() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(root.path());
        let runtime = HostRuntime::new();
        let handle = runtime
            .prepare(&EnvironmentSpec {
                stage: "build".to_string(),
                image: "alpine".to_string(),
                workdir: "/workspace".to_string(),
                mounts: Vec::new(),
                labels: BTreeMap::new(),
            })
            .await
            .unwrap();

        let stale = store.stage_dir("build").join("dist");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("stale.txt"), "old").unwrap();

        let request = crate::runtime::ExecRequest {
            command: "mkdir -p dist && printf hi > dist/index.html".to_string(),
            workdir: "/workspace".to_string(),
            env: Vec::new(),
        };
        runtime.exec(&handle, &request).await.unwrap();

        let record = store.export(&runtime, &handle, &output("/workspace/dist")).await.unwrap();
        assert_eq!(record.files, 1);
        assert_eq!(record.bytes, 2);
        assert!(!stale.join("stale.txt").exists());
        assert_eq!(std::fs::read_to_string(record.destination.join("index.html")).unwrap(), "hi");

        runtime.teardown(&handle).await.unwrap();
    }

    async fn prepared(runtime: &HostRuntime) -> EnvironmentHandle {
        runtime
            .prepare(&EnvironmentSpec {
                stage: "build".to_string(),
                image: "alpine".to_string(),
                workdir: "/workspace".to_string(),
                mounts: Vec::new(),
                labels: BTreeMap::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_output_keeps_previous_destination() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(root.path().join("artifacts"));
        let runtime = HostRuntime::new();
        let handle = prepared(&runtime).await;

        let outer = tempfile::tempdir().unwrap();
        let keep = outer.path().join("site");
        std::fs::create_dir_all(&keep).unwrap();
        std::fs::write(keep.join("precious.txt"), "keep me").unwrap();

        let err = store
            .export(&runtime, &handle, &output("/workspace/missing").to(&keep))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "artifact_not_found");
        assert_eq!(std::fs::read_to_string(keep.join("precious.txt")).unwrap(), "keep me");
        let entries: Vec<_> = std::fs::read_dir(outer.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("site")]);

        runtime.teardown(&handle).await.unwrap();
    }

    #[test]
    fn test_relative_root_is_made_absolute() {
        let store = ArtifactStore::new(".dockhand/artifacts");
        assert!(store.root().is_absolute());
        assert!(store.import("build", "/in").source.is_absolute());
    }

    #[test]
    fn test_check_destinations_rejects_shared_path() {
        let store = ArtifactStore::new("/tmp/artifacts");
        let stage = StageSpec::new("build", "alpine")
            .with_output(output("/workspace/dist"))
            .with_output(output("/workspace/report").to("/tmp/artifacts/build/dist"));

        let err = store.check_destinations(&stage).unwrap_err();
        assert_eq!(err.kind(), "validation");

        let stage = StageSpec::new("build", "alpine").with_output(output("/workspace/dist"));
        assert!(store.check_destinations(&stage).is_ok());
    }
}

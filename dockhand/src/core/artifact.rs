//! Record of an artifact exported from a stage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An artifact produced by a stage and copied out of its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// The stage that produced the artifact.
    pub stage: String,
    /// Path inside the execution environment.
    pub source: String,
    /// Where the artifact now lives on the host.
    pub destination: PathBuf,
    /// Number of regular files exported.
    pub files: usize,
    /// Total size of the exported files in bytes.
    pub bytes: u64,
    /// Hex-encoded SHA-256 over relative paths and contents, in path order.
    pub sha256: String,
}

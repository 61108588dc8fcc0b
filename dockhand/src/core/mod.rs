//! Core domain model types for dockhand.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage and pipeline status enums
//! - The immutable per-stage execution result
//! - Artifact records and the pipeline report

mod artifact;
mod report;
mod result;
mod status;

pub use artifact::ArtifactRecord;
pub use report::PipelineReport;
pub use result::ExecutionResult;
pub use status::{PipelineStatus, StageStatus};

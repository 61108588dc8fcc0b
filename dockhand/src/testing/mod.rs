//! Testing utilities for dockhand pipelines.
//!
//! This module provides:
//! - [`MockRuntime`], a scripted runtime that records every call
//! - [`SharedResource`], a start-once, reset-always test fixture
//! - Assertions over [`PipelineReport`](crate::core::PipelineReport)s

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_failed_at, assert_no_secret_leak, assert_pipeline_succeeded, assert_stage_status};
pub use fixtures::{ResourceLifecycle, SharedResource};
pub use mocks::{ExecCall, MockRuntime};

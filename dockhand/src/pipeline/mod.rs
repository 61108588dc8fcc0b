//! Pipeline definition and execution.
//!
//! This module provides:
//! - Stage specifications
//! - The validating pipeline builder and the resulting DAG
//! - Retry policy for transient environment failures
//! - The bounded-parallel runner

mod builder;
mod graph;
mod retry;
mod runner;
mod spec;

pub use builder::PipelineBuilder;
pub use graph::Pipeline;
pub use retry::{
    should_retry, with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState,
};
pub use runner::PipelineRunner;
pub use spec::{Mount, OutputSpec, SecretRef, StageSpec, DEFAULT_WORKDIR};

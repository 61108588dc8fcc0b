//! Lifecycle events emitted while a pipeline runs.
//!
//! The runner emits one event per state change. Payloads are JSON objects
//! carrying at least `run_id` and `pipeline`; stage events add `stage`.
//! Secret values never appear in payloads.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod types {
    /// A run began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// Every stage succeeded.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A stage failed and the run halted.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// The run was cancelled by the caller.
    pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
    /// A stage was dispatched.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage finished with exit code 0.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was cancelled while in flight.
    pub const STAGE_CANCELLED: &str = "stage.cancelled";
    /// Environment setup failed transiently and will be retried.
    pub const STAGE_RETRYING: &str = "stage.retrying";
}

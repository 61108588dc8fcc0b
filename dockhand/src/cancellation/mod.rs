//! Cooperative cancellation for pipeline runs.
//!
//! A single [`CancellationToken`] is shared by the caller and the runner.
//! The runner derives a child token per run so a stage failure can halt the
//! remaining work without cancelling the caller's token.

mod token;

pub use token::{CancelCallback, CancellationToken};

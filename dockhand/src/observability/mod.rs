//! Logging setup.
//!
//! Library code only emits `tracing` events; binaries call [`init_logging`]
//! once at startup.

mod logging;

pub use logging::{init_logging, LogFormat, DEFAULT_FILTER};

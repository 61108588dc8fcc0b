//! Utility functions for timestamps, validation and filesystem copies.

pub mod fs;
pub mod timestamps;
pub mod validation;

pub use timestamps::{format_iso8601, iso_timestamp, now_utc, Timestamp};
pub use validation::{is_absolute_container_path, is_valid_env_name};

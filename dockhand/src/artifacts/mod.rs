//! Hand-off of files between stages.
//!
//! Outputs are copied out of a stage's environment into a host directory
//! tree rooted at the store's root, by default `<root>/<stage>/<basename>`.
//! Later stages consume them through read-only mounts.

mod store;

pub use store::{digest_path, ArtifactStore};

//! Run-scoped context: identity and event emission.

mod run;

pub use run::RunContext;

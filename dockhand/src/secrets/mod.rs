//! Scoped secret injection.
//!
//! Values live in a [`SecretStore`] for the duration of a run, are bound to
//! a stage by [`SecretInjector::bind`], and are only exposed inside the exec
//! request handed to the runtime. Captured output passes through a
//! [`Redactor`] before it is stored or logged.

mod injector;
mod redact;
mod store;

pub use injector::{SecretBinding, SecretInjector};
pub use redact::{Redactor, REDACTED};
pub use store::{SecretSource, SecretStore, SecretValue};

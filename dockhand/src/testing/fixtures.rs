//! Shared, expensive test resources.
//!
//! A [`SharedResource`] is started once per test binary and reset after
//! every test that uses it, whether the test passed, failed or panicked.
//!
//! ```ignore
//! static DAEMON: SharedResource<ScratchDaemon> = SharedResource::new();
//!
//! #[tokio::test]
//! async fn builds_image() {
//!     DAEMON.run_test(|daemon| async move { /* ... */ }).await;
//! }
//! ```

use crate::errors::DockhandError;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

/// Lifecycle hooks of a shared test resource.
#[async_trait]
pub trait ResourceLifecycle: Send + Sync + Sized + 'static {
    /// Starts the resource. Called at most once.
    async fn start() -> Result<Self, DockhandError>;

    /// Returns the resource to a clean state after a test.
    async fn reset(&self) -> Result<(), DockhandError>;

    /// Releases the resource.
    async fn stop(&self) -> Result<(), DockhandError>;
}

/// A lazily started resource shared by the tests of one binary.
///
/// Tests using the same resource run one at a time.
pub struct SharedResource<R> {
    cell: OnceCell<R>,
    gate: Mutex<()>,
}

impl<R: ResourceLifecycle> SharedResource<R> {
    /// Creates an unstarted resource; usable in a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
            gate: Mutex::const_new(()),
        }
    }

    /// Starts the resource on first use and returns it.
    ///
    /// # Errors
    ///
    /// Returns the error from [`ResourceLifecycle::start`].
    pub async fn get(&self) -> Result<&R, DockhandError> {
        self.cell.get_or_try_init(R::start).await
    }

    /// Runs `test` against the resource, then resets it.
    ///
    /// A panic inside `test` is re-raised after the reset.
    ///
    /// # Panics
    ///
    /// Panics if the resource cannot be started, or re-raises the test's
    /// own panic.
    pub async fn run_test<'a, F, Fut, T>(&'a self, test: F) -> T
    where
        F: FnOnce(&'a R) -> Fut,
        Fut: Future<Output = T>,
    {
        let _gate = self.gate.lock().await;
        let resource = match self.get().await {
            Ok(resource) => resource,
            Err(e) => panic!("shared test resource failed to start: {e}"),
        };

        let outcome = AssertUnwindSafe(test(resource)).catch_unwind().await;

        if let Err(e) = resource.reset().await {
            warn!(error = %e, "Failed to reset shared test resource");
        }

        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Stops the resource if it was started.
    ///
    /// # Errors
    ///
    /// Returns the error from [`ResourceLifecycle::stop`].
    pub async fn stop(&self) -> Result<(), DockhandError> {
        let _gate = self.gate.lock().await;
        match self.cell.get() {
            Some(resource) => resource.stop().await,
            None => Ok(()),
        }
    }

    /// Returns true once the resource has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.cell.initialized()
    }
}

impl<R: ResourceLifecycle> Default for SharedResource<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static STARTS: AtomicUsize = AtomicUsize::new(0);

    struct Counter {
        resets: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ResourceLifecycle for Counter {
        async fn start() -> Result<Self, DockhandError> {
            STARTS.fetch_add(1, Ordering::SeqCst);
            Ok(Self {
                resets: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }

        async fn reset(&self) -> Result<(), DockhandError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), DockhandError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    static SHARED: SharedResource<Counter> = SharedResource::new();

    #[tokio::test]
    async fn test_started_once_and_reset_after_every_test() {
        assert!(!SHARED.is_started());

        let first = SHARED.run_test(|c| async move { c.resets.load(Ordering::SeqCst) }).await;
        assert_eq!(first, 0);

        let panicked = AssertUnwindSafe(SHARED.run_test(|_| async { panic!("test failed") }))
            .catch_unwind()
            .await;
        assert!(panicked.is_err());

        let resets = SHARED.run_test(|c| async move { c.resets.load(Ordering::SeqCst) }).await;
        assert_eq!(resets, 2);
        assert_eq!(STARTS.load(Ordering::SeqCst), 1);

        SHARED.stop().await.unwrap();
        assert_eq!(SHARED.get().await.unwrap().stops.load(Ordering::SeqCst), 1);
    }
}

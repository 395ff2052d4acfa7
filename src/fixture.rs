//! # Per-Test Fixtures
//!
//! [`TestContext`] is the scoped state of one test case. Cleanup actions
//! registered on it run once the test body returns, whatever its outcome, in
//! reverse registration order.
//!
//! [`FixtureBuilder`] hands a test the shared connection handle wrapped in the
//! domain object under test, and registers the cleanup hook on the context:
//!
//! ```rust,ignore
//! let storage = fixtures.build(&ctx, Storage::new); // data reset after the test
//! storage.do_something().await?;
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::hooks::Cleanup;

type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, HarnessResult<()>> + Send>;

pub struct TestContext {
    name: String,
    cleanups: Mutex<Vec<CleanupAction>>,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("name", &self.name)
            .field("pending_cleanups", &self.pending_cleanups())
            .finish()
    }
}

impl TestContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an action to run after the test body.
    pub fn cleanup<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = HarnessResult<()>> + Send + 'static,
    {
        self.cleanups
            .lock()
            .push(Box::new(move || action().boxed()));
    }

    pub fn pending_cleanups(&self) -> usize {
        self.cleanups.lock().len()
    }

    /// Run and drain every registered action, last registered first.
    ///
    /// All actions run even when one fails; the errors are returned.
    ///
    /// ```rust
    /// use ephemeral_pg_harness::TestContext;
    ///
    /// # tokio_test::block_on(async {
    /// let ctx = TestContext::new("drop_table");
    /// ctx.cleanup(|| async { Ok(()) });
    /// assert_eq!(ctx.pending_cleanups(), 1);
    ///
    /// assert!(ctx.run_cleanups().await.is_empty());
    /// assert_eq!(ctx.pending_cleanups(), 0);
    /// # });
    /// ```
    pub async fn run_cleanups(&self) -> Vec<HarnessError> {
        let actions = std::mem::take(&mut *self.cleanups.lock());
        let mut errors = Vec::new();

        for action in actions.into_iter().rev() {
            let result = AssertUnwindSafe(async move { action().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(HarnessError::Cleanup {
                        test: self.name.clone(),
                        message: format!("cleanup panicked: {}", panic_message(payload.as_ref())),
                    })
                });
            if let Err(e) = result {
                warn!(test = %self.name, error = %e, "cleanup failed");
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            debug!(test = %self.name, failures = errors.len(), "cleanups finished with errors");
        }
        errors
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Builds per-test domain objects around the shared connection handle.
pub struct FixtureBuilder<H> {
    handle: Arc<H>,
    cleanup: Arc<dyn Cleanup<H>>,
}

impl<H> Clone for FixtureBuilder<H> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            cleanup: Arc::clone(&self.cleanup),
        }
    }
}

impl<H> FixtureBuilder<H>
where
    H: Send + Sync + 'static,
{
    pub fn new(handle: Arc<H>, cleanup: Arc<dyn Cleanup<H>>) -> Self {
        Self { handle, cleanup }
    }

    pub fn handle(&self) -> &Arc<H> {
        &self.handle
    }

    /// Wrap the handle with `wrap` and schedule the cleanup hook on `ctx`.
    pub fn build<D, W>(&self, ctx: &TestContext, wrap: W) -> D
    where
        W: FnOnce(Arc<H>) -> D,
    {
        let handle = Arc::clone(&self.handle);
        let cleanup = Arc::clone(&self.cleanup);
        let test = ctx.name().to_string();

        ctx.cleanup(move || async move {
            cleanup
                .cleanup(&handle)
                .await
                .map_err(|e| HarnessError::Cleanup {
                    test,
                    message: e.to_string(),
                })
        });

        wrap(Arc::clone(&self.handle))
    }
}

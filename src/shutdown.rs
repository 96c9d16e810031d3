//! Teardown: close every live resource, idle or checked out

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::factory::ResourceFactory;
use crate::pool::{DiscardReason, Handoff, PoolShared};

impl<F: ResourceFactory> PoolShared<F> {
    /// Returns `false` if the pool had already been shut down
    pub(crate) fn shutdown(&self) -> bool {
        let waiters: Vec<_> = {
            let mut waiters = self.waiters.lock();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return false;
            }
            waiters.drain(..).collect()
        };

        let woken = waiters.len();
        for waiter in waiters {
            let _ = waiter.notifier.notify(Handoff::Closed);
        }

        let mut cached = 0;
        while let Some(idle) = self.cache.pop() {
            self.discard(&idle.entry, DiscardReason::ShutDown);
            cached += 1;
        }

        // Whatever is left is checked out. Close it in place; the borrower's
        // eventual release removes it from `extant`.
        let extant = self.extant.lock();
        for entry in extant.values() {
            self.close_entry(entry);
        }
        let checked_out = extant.len();
        drop(extant);

        info!(cached, checked_out, woken, "resource pool shut down");
        true
    }
}

/// Closes a pool's resources from outside the pool, e.g. on a signal
///
/// Holds only a weak reference: once the pool is gone `run` does nothing.
/// Running it more than once is harmless.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{PoolConfiguration, ResourceFactory, ResourcePool};
/// use std::convert::Infallible;
/// use std::time::Duration;
///
/// struct Unit;
///
/// impl ResourceFactory for Unit {
///     type Resource = ();
///     type Error = Infallible;
///
///     fn create(&self) -> Result<(), Infallible> { Ok(()) }
///     fn validate(&self, _: &(), _: Duration) -> bool { true }
///     fn close(&self, _: &()) -> Result<(), Infallible> { Ok(()) }
/// }
///
/// let pool = ResourcePool::new(Unit, PoolConfiguration::new().without_maintenance()).unwrap();
/// let handler = pool.shutdown_handler();
///
/// assert!(handler.run());
/// assert!(!handler.run());
/// assert!(pool.acquire().is_err());
/// ```
pub struct ShutdownHandler<F: ResourceFactory> {
    pool: Weak<PoolShared<F>>,
}

impl<F: ResourceFactory> ShutdownHandler<F> {
    pub(crate) fn new(pool: &Arc<PoolShared<F>>) -> Self {
        Self {
            pool: Arc::downgrade(pool),
        }
    }

    /// Shut the pool down now. Returns `true` only for the call that did it.
    pub fn run(&self) -> bool {
        match self.pool.upgrade() {
            Some(pool) => pool.shutdown(),
            None => false,
        }
    }

    /// Run the handler when the process receives Ctrl-C
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_ctrl_c(&self) -> JoinHandle<()> {
        let handler = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    handler.run();
                }
                Err(err) => warn!(error = %err, "could not listen for ctrl-c"),
            }
        })
    }
}

impl<F: ResourceFactory> Clone for ShutdownHandler<F> {
    fn clone(&self) -> Self {
        Self {
            pool: Weak::clone(&self.pool),
        }
    }
}

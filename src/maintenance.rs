//! Background upkeep of idle resources
//!
//! Each tick looks at exactly one idle resource, the oldest in the cache,
//! and either retires it or puts it back. Stale resources therefore take up
//! to `max_cached` ticks to be noticed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::errors::{PoolError, PoolResult};
use crate::factory::ResourceFactory;
use crate::pool::{DiscardReason, Entry, PoolShared};

/// What a single maintenance step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceOutcome {
    /// The cache was empty
    NothingCached,
    /// The oldest idle resource outlived the eviction policy and was closed
    Expired,
    /// The oldest idle resource failed validation and was closed
    Invalid,
    /// The oldest idle resource passed and went back to the pool
    Retained,
}

impl<F: ResourceFactory> PoolShared<F> {
    pub(crate) fn maintain(self: &Arc<Self>) -> MaintenanceOutcome {
        let Some(idle) = self.cache.pop() else {
            return MaintenanceOutcome::NothingCached;
        };

        if self.config.eviction.is_expired(idle.entry.created_at, idle.obtained_at) {
            self.discard(&idle.entry, DiscardReason::Expired);
            return MaintenanceOutcome::Expired;
        }

        if !self.validate_entry(&idle.entry) {
            self.metrics.record_validation_failure();
            self.discard(&idle.entry, DiscardReason::Invalid);
            return MaintenanceOutcome::Invalid;
        }

        self.checkin(idle);
        MaintenanceOutcome::Retained
    }

    fn validate_entry(&self, entry: &Entry<F::Resource>) -> bool {
        if entry.is_closed() {
            return false;
        }

        let timeout = self.config.validation_timeout;
        panic::catch_unwind(AssertUnwindSafe(|| self.factory.validate(&entry.resource, timeout)))
            .unwrap_or_else(|_| {
                warn!(resource_id = entry.id, "resource validation panicked");
                false
            })
    }
}

/// The thread running maintenance on a fixed period
///
/// It only holds a weak reference to the pool and exits once the pool is gone
/// or [`stop`](Self::stop) is called.
pub(crate) struct MaintenanceWorker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceWorker {
    pub(crate) fn spawn<F: ResourceFactory>(shared: &Arc<PoolShared<F>>, interval: Duration) -> PoolResult<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let pool = Arc::downgrade(shared);

        let handle = thread::Builder::new()
            .name("resource-pool-maintenance".to_string())
            .spawn(move || {
                debug!(?interval, "maintenance task started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    let Some(pool) = pool.upgrade() else {
                        break;
                    };
                    let outcome = pool.maintain();
                    trace!(?outcome, "maintenance tick");
                }
                debug!("maintenance task stopped");
            })
            .map_err(|err| PoolError::MaintenanceStart(err.to_string()))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for an in-flight tick to finish
    pub(crate) fn stop(&mut self) {
        // Disconnecting the channel wakes the thread
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

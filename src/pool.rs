//! Core resource pool implementation

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::factory::ResourceFactory;
use crate::health::HealthStatus;
use crate::maintenance::{MaintenanceOutcome, MaintenanceWorker};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::shutdown::ShutdownHandler;

use crossbeam::channel;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One live resource as the pool tracks it
pub(crate) struct Entry<R> {
    pub(crate) id: u64,
    pub(crate) resource: R,
    pub(crate) created_at: Instant,
    closed: AtomicBool,
}

impl<R> Entry<R> {
    fn new(id: u64, resource: R) -> Self {
        Self {
            id,
            resource,
            created_at: Instant::now(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A cached resource together with the instant it was last handed out
pub(crate) struct Idle<R> {
    pub(crate) entry: Arc<Entry<R>>,
    pub(crate) obtained_at: Instant,
}

/// What a release (or a discard) hands to a blocked acquirer
pub(crate) enum Handoff<R> {
    /// A released resource, passed on without touching the cache
    Resource(Idle<R>),
    /// A creation slot freed by a discard; the receiver may create
    Permit,
    /// The pool was shut down while waiting
    Closed,
}

pub(crate) enum Notifier<R> {
    Blocking(channel::Sender<Handoff<R>>),
    Async(oneshot::Sender<Handoff<R>>),
}

impl<R> Notifier<R> {
    /// Hand over `handoff`, giving it back if the waiter has gone away
    pub(crate) fn notify(self, handoff: Handoff<R>) -> Result<(), Handoff<R>> {
        match self {
            Notifier::Blocking(tx) => tx.try_send(handoff).map_err(|err| err.into_inner()),
            Notifier::Async(tx) => tx.send(handoff),
        }
    }
}

pub(crate) struct Waiter<R> {
    id: u64,
    pub(crate) notifier: Notifier<R>,
}

/// Pass `handoff` to the longest-waiting acquirer still listening.
/// Returns it when nobody took it.
fn deliver<R>(waiters: &mut VecDeque<Waiter<R>>, mut handoff: Handoff<R>) -> Option<Handoff<R>> {
    while let Some(waiter) = waiters.pop_front() {
        match waiter.notifier.notify(handoff) {
            Ok(()) => return None,
            Err(returned) => handoff = returned,
        }
    }
    Some(handoff)
}

/// Why a resource left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiscardReason {
    CacheFull,
    Expired,
    Invalid,
    Requested,
    Closed,
    ShutDown,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DiscardReason::CacheFull => "cache full",
            DiscardReason::Expired => "expired",
            DiscardReason::Invalid => "failed validation",
            DiscardReason::Requested => "discarded by borrower",
            DiscardReason::Closed => "closed while checked out",
            DiscardReason::ShutDown => "pool shut down",
        };
        f.write_str(reason)
    }
}

enum Enqueued<F: ResourceFactory> {
    Ready(PoolResult<PooledResource<F>>),
    Waiting(u64),
}

/// State shared by the pool handle, its borrowers, the maintenance task and
/// the shutdown handler
pub(crate) struct PoolShared<F: ResourceFactory> {
    pub(crate) factory: F,
    pub(crate) config: PoolConfiguration,
    /// Idle resources, oldest at the head
    pub(crate) cache: ArrayQueue<Idle<F::Resource>>,
    /// Every live resource, idle or checked out
    pub(crate) extant: Mutex<HashMap<u64, Arc<Entry<F::Resource>>>>,
    /// Live resources plus creations in flight; never above `max_extant`
    created: AtomicUsize,
    /// Blocked acquirers, longest waiting first. Nothing enters `cache`
    /// while this is non-empty.
    pub(crate) waiters: Mutex<VecDeque<Waiter<F::Resource>>>,
    next_id: AtomicU64,
    next_waiter_id: AtomicU64,
    pub(crate) shut_down: AtomicBool,
    pub(crate) metrics: MetricsTracker,
}

impl<F: ResourceFactory> PoolShared<F> {
    fn new(factory: F, config: PoolConfiguration) -> Self {
        Self {
            factory,
            // Never holds more than `max_extant` entries
            cache: ArrayQueue::new(config.max_cached.min(config.max_extant)),
            config,
            extant: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            waiters: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
        }
    }

    fn ensure_running(&self) -> PoolResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(PoolError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Claim one creation slot if the pool is below `max_extant`
    fn try_reserve(&self) -> bool {
        let max = self.config.max_extant;
        self.created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max).then_some(count + 1)
            })
            .is_ok()
    }

    /// Give a creation slot back, or pass it to a blocked acquirer
    pub(crate) fn release_permit(&self) {
        let mut waiters = self.waiters.lock();
        if deliver(&mut waiters, Handoff::Permit).is_some() {
            self.created.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn created_count(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    fn acquire(self: &Arc<Self>, timeout: Option<Duration>) -> PoolResult<PooledResource<F>> {
        if let Some(result) = self.try_acquire()? {
            return Ok(result);
        }
        self.wait_blocking(timeout)
    }

    async fn acquire_async(self: &Arc<Self>, timeout: Option<Duration>) -> PoolResult<PooledResource<F>> {
        if let Some(result) = self.try_acquire()? {
            return Ok(result);
        }
        self.wait_async(timeout).await
    }

    /// Cache first, then creation. `None` when the pool is exhausted.
    fn try_acquire(self: &Arc<Self>) -> PoolResult<Option<PooledResource<F>>> {
        self.ensure_running()?;

        if let Some(idle) = self.cache.pop() {
            return Ok(Some(self.checkout(idle)));
        }
        if self.try_reserve() {
            return self.create_reserved().map(Some);
        }
        Ok(None)
    }

    fn checkout(self: &Arc<Self>, idle: Idle<F::Resource>) -> PooledResource<F> {
        self.metrics.record_reused();
        debug!(resource_id = idle.entry.id, "reusing cached resource");
        PooledResource::new(idle.entry, Arc::clone(self))
    }

    /// Create a resource with a slot already claimed by `try_reserve` or
    /// received as a permit
    fn create_reserved(self: &Arc<Self>) -> PoolResult<PooledResource<F>> {
        let reservation = Reservation { pool: &**self, armed: true };

        match self.factory.create() {
            Ok(resource) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let entry = Arc::new(Entry::new(id, resource));

                // Shutdown sets its flag before walking `extant`, so checking
                // under the lock means the entry is either seen by that walk
                // or never handed out.
                let admitted = {
                    let mut extant = self.extant.lock();
                    let running = !self.shut_down.load(Ordering::Acquire);
                    if running {
                        extant.insert(id, Arc::clone(&entry));
                    }
                    running
                };
                if !admitted {
                    self.close_entry(&entry);
                    debug!(resource_id = id, "closed resource created during shutdown");
                    return Err(PoolError::ShutDown);
                }

                reservation.keep();
                self.metrics.record_created();
                debug!(resource_id = id, extant = self.created_count(), "created resource");
                Ok(PooledResource::new(entry, Arc::clone(self)))
            }
            Err(err) => {
                drop(reservation);
                self.metrics.record_creation_failure();
                warn!(error = %err, "failed to create resource");
                Err(PoolError::creation(err))
            }
        }
    }

    /// Join the waiter queue, unless the cache or the creation limit
    /// opened up in the meantime
    fn enqueue(self: &Arc<Self>, notifier: Notifier<F::Resource>) -> Enqueued<F> {
        let mut waiters = self.waiters.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return Enqueued::Ready(Err(PoolError::ShutDown));
        }
        if let Some(idle) = self.cache.pop() {
            drop(waiters);
            return Enqueued::Ready(Ok(self.checkout(idle)));
        }
        if self.try_reserve() {
            drop(waiters);
            return Enqueued::Ready(self.create_reserved());
        }

        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        waiters.push_back(Waiter { id, notifier });
        let waiting = waiters.len();
        self.metrics.record_exhaustion_stall();
        drop(waiters);

        warn!(
            waiting,
            max_extant = self.config.max_extant,
            "resource pool exhausted, waiting for a release"
        );
        Enqueued::Waiting(id)
    }

    fn withdraw(&self, waiter_id: u64) {
        self.waiters.lock().retain(|waiter| waiter.id != waiter_id);
    }

    fn accept(self: &Arc<Self>, handoff: Handoff<F::Resource>) -> PoolResult<PooledResource<F>> {
        match handoff {
            Handoff::Resource(idle) => Ok(self.checkout(idle)),
            Handoff::Permit => self.create_reserved(),
            Handoff::Closed => Err(PoolError::ShutDown),
        }
    }

    /// Put back a handoff whose receiver gave up on it
    fn reclaim(self: &Arc<Self>, handoff: Handoff<F::Resource>) {
        match handoff {
            Handoff::Resource(idle) => self.checkin(idle),
            Handoff::Permit => self.release_permit(),
            Handoff::Closed => {}
        }
    }

    fn wait_blocking(self: &Arc<Self>, timeout: Option<Duration>) -> PoolResult<PooledResource<F>> {
        let (tx, rx) = channel::bounded(1);
        let waiter_id = match self.enqueue(Notifier::Blocking(tx)) {
            Enqueued::Ready(result) => return result,
            Enqueued::Waiting(id) => id,
        };

        let received = match timeout {
            Some(limit) => rx.recv_timeout(limit).ok(),
            None => rx.recv().ok(),
        };
        if let Some(handoff) = received {
            return self.accept(handoff);
        }

        // Deliveries happen under the waiter lock, so once withdrawn nothing
        // else can arrive; pick up anything that raced the deadline.
        self.withdraw(waiter_id);
        match rx.try_recv() {
            Ok(handoff) => self.accept(handoff),
            Err(_) => match timeout {
                Some(limit) => {
                    self.metrics.record_timeout();
                    Err(PoolError::Timeout(limit))
                }
                None => Err(PoolError::ShutDown),
            },
        }
    }

    async fn wait_async(self: &Arc<Self>, timeout: Option<Duration>) -> PoolResult<PooledResource<F>> {
        let (tx, rx) = oneshot::channel();
        let waiter_id = match self.enqueue(Notifier::Async(tx)) {
            Enqueued::Ready(result) => return result,
            Enqueued::Waiting(id) => id,
        };

        let mut pending = PendingWait {
            pool: self,
            waiter_id,
            rx,
            settled: false,
        };

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut pending.rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.metrics.record_timeout();
                    return Err(PoolError::Timeout(limit));
                }
            },
            None => (&mut pending.rx).await,
        };
        pending.settled = true;

        match received {
            Ok(handoff) => self.accept(handoff),
            Err(_) => Err(PoolError::ShutDown),
        }
    }

    /// A borrower is done with its resource
    pub(crate) fn release_entry(self: &Arc<Self>, idle: Idle<F::Resource>) {
        self.metrics.record_released();
        if idle.entry.is_closed() {
            self.discard(&idle.entry, DiscardReason::Closed);
            return;
        }
        self.checkin(idle);
    }

    /// Make an idle resource available: to the first waiter if there is one,
    /// otherwise as the newest cache entry, evicting the oldest when full
    pub(crate) fn checkin(self: &Arc<Self>, idle: Idle<F::Resource>) {
        let mut waiters = self.waiters.lock();
        if self.shut_down.load(Ordering::Acquire) {
            drop(waiters);
            self.discard(&idle.entry, DiscardReason::ShutDown);
            return;
        }

        let displaced = match deliver(&mut waiters, Handoff::Resource(idle)) {
            Some(Handoff::Resource(idle)) => self.cache.force_push(idle),
            _ => None,
        };
        drop(waiters);

        if let Some(oldest) = displaced {
            self.discard(&oldest.entry, DiscardReason::CacheFull);
        }
    }

    /// Close a resource and forget it. Idempotent.
    pub(crate) fn discard(&self, entry: &Arc<Entry<F::Resource>>, reason: DiscardReason) {
        self.close_entry(entry);
        if self.extant.lock().remove(&entry.id).is_some() {
            self.metrics.record_discarded();
            debug!(resource_id = entry.id, %reason, "discarded resource");
            self.release_permit();
        }
    }

    /// Physically close the raw resource once; failures are logged only
    pub(crate) fn close_entry(&self, entry: &Entry<F::Resource>) {
        if entry.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.factory.close(&entry.resource) {
            self.metrics.record_close_failure();
            warn!(resource_id = entry.id, error = %err, "failed to close resource");
        }
    }

    pub(crate) fn metrics_snapshot(&self) -> PoolMetrics {
        let extant = self.extant.lock().len();
        let cached = self.cache.len();
        let waiting = self.waiters.lock().len();
        self.metrics.get_metrics(
            cached,
            extant,
            waiting,
            self.config.max_cached,
            self.config.max_extant,
        )
    }
}

/// Gives a claimed creation slot back unless creation succeeded
struct Reservation<'a, F: ResourceFactory> {
    pool: &'a PoolShared<F>,
    armed: bool,
}

impl<F: ResourceFactory> Reservation<'_, F> {
    fn keep(mut self) {
        self.armed = false;
    }
}

impl<F: ResourceFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_permit();
        }
    }
}

/// An async acquirer parked in the waiter queue. Dropping it before a
/// handoff is received withdraws the waiter and returns whatever had already
/// been delivered.
struct PendingWait<'a, F: ResourceFactory> {
    pool: &'a Arc<PoolShared<F>>,
    waiter_id: u64,
    rx: oneshot::Receiver<Handoff<F::Resource>>,
    settled: bool,
}

impl<F: ResourceFactory> Drop for PendingWait<'_, F> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.pool.withdraw(self.waiter_id);
        if let Ok(handoff) = self.rx.try_recv() {
            self.pool.reclaim(handoff);
        }
    }
}

/// A resource on loan from a [`ResourcePool`]
///
/// Dropping it (or calling [`release`](Self::release)) returns it to the
/// pool; only [`discard`](Self::discard) or the pool itself ever closes the
/// underlying resource.
pub struct PooledResource<F: ResourceFactory> {
    entry: Arc<Entry<F::Resource>>,
    obtained_at: Instant,
    pool: Arc<PoolShared<F>>,
    discard_on_drop: bool,
}

impl<F: ResourceFactory> PooledResource<F> {
    fn new(entry: Arc<Entry<F::Resource>>, pool: Arc<PoolShared<F>>) -> Self {
        Self {
            entry,
            obtained_at: Instant::now(),
            pool,
            discard_on_drop: false,
        }
    }

    /// Identifier the pool assigned when the resource was created
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// When this resource was handed out
    pub fn obtained_at(&self) -> Instant {
        self.obtained_at
    }

    /// When the underlying resource was created
    pub fn created_at(&self) -> Instant {
        self.entry.created_at
    }

    /// Whether the pool has already closed the underlying resource
    /// (it does so when shutting down)
    pub fn is_closed(&self) -> bool {
        self.entry.is_closed()
    }

    /// Return the resource to its pool
    pub fn release(self) {
        drop(self);
    }

    /// Close the resource instead of returning it, e.g. after the borrower
    /// saw it break. Frees a slot for a new resource.
    pub fn discard(mut self) {
        self.discard_on_drop = true;
    }
}

impl<F: ResourceFactory> Deref for PooledResource<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        &self.entry.resource
    }
}

impl<F: ResourceFactory> Drop for PooledResource<F> {
    fn drop(&mut self) {
        let entry = Arc::clone(&self.entry);
        if self.discard_on_drop {
            self.pool.discard(&entry, DiscardReason::Requested);
        } else {
            self.pool.release_entry(Idle {
                entry,
                obtained_at: self.obtained_at,
            });
        }
    }
}

impl<F> fmt::Debug for PooledResource<F>
where
    F: ResourceFactory,
    F::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.entry.id)
            .field("resource", &self.entry.resource)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Bounded pool of factory-created resources
///
/// At most `max_extant` resources exist at once and at most `max_cached`
/// of them sit idle. Idle resources are reused oldest first. When the pool is
/// exhausted, `acquire` blocks until a borrower releases; blocked callers are
/// served in arrival order.
///
/// Dropping the pool stops maintenance and runs the shutdown handler, which
/// closes every resource, including ones still checked out.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{PoolConfiguration, ResourceFactory, ResourcePool};
/// use std::convert::Infallible;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// struct Counter(AtomicUsize);
///
/// impl ResourceFactory for Counter {
///     type Resource = usize;
///     type Error = Infallible;
///
///     fn create(&self) -> Result<usize, Infallible> {
///         Ok(self.0.fetch_add(1, Ordering::Relaxed))
///     }
///     fn validate(&self, _: &usize, _: Duration) -> bool { true }
///     fn close(&self, _: &usize) -> Result<(), Infallible> { Ok(()) }
/// }
///
/// let config = PoolConfiguration::new().with_max_cached(2).with_max_extant(4);
/// let pool = ResourcePool::new(Counter(AtomicUsize::new(0)), config).unwrap();
///
/// let first_id = {
///     let res = pool.acquire().unwrap();
///     assert_eq!(*res, 0);
///     res.id()
///     // returned to the pool here
/// };
///
/// let again = pool.acquire().unwrap();
/// assert_eq!(again.id(), first_id);
/// ```
pub struct ResourcePool<F: ResourceFactory> {
    shared: Arc<PoolShared<F>>,
    maintenance: Option<MaintenanceWorker>,
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a pool and, if configured, start its maintenance thread
    pub fn new(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;
        if config.max_cached > config.max_extant {
            warn!(
                max_cached = config.max_cached,
                max_extant = config.max_extant,
                "max_cached exceeds max_extant; the cache can never fill"
            );
        }

        let interval = config.maintenance_interval;
        let shared = Arc::new(PoolShared::new(factory, config));
        let maintenance = interval
            .map(|interval| MaintenanceWorker::spawn(&shared, interval))
            .transpose()?;

        Ok(Self { shared, maintenance })
    }

    /// Borrow a resource, blocking while the pool is exhausted
    ///
    /// Waits for at most the configured `acquire_timeout`, or forever when
    /// none is set.
    pub fn acquire(&self) -> PoolResult<PooledResource<F>> {
        self.shared.acquire(self.shared.config.acquire_timeout)
    }

    /// Borrow a resource, waiting at most `timeout` on an exhausted pool
    pub fn acquire_timeout(&self, timeout: Duration) -> PoolResult<PooledResource<F>> {
        self.shared.acquire(Some(timeout))
    }

    /// Borrow a resource without waiting. `Ok(None)` means exhausted.
    pub fn try_acquire(&self) -> PoolResult<Option<PooledResource<F>>> {
        self.shared.try_acquire()
    }

    /// Borrow a resource from async code
    ///
    /// Waits on the pool without blocking the runtime and honours the
    /// configured `acquire_timeout`. Dropping the future gives up the place
    /// in the queue. The factory's `create` still runs inline.
    pub async fn acquire_async(&self) -> PoolResult<PooledResource<F>> {
        self.shared.acquire_async(self.shared.config.acquire_timeout).await
    }

    /// Return a borrowed resource. Same as dropping it.
    pub fn release(&self, resource: PooledResource<F>) {
        resource.release();
    }

    /// Run one maintenance step now, outside the background schedule
    pub fn run_maintenance(&self) -> MaintenanceOutcome {
        self.shared.maintain()
    }

    /// Close every resource and refuse further acquisitions.
    /// Returns `false` if the pool was already shut down.
    pub fn shutdown(&self) -> bool {
        self.shared.shutdown()
    }

    /// Handle that can shut this pool down from elsewhere, e.g. a signal hook
    pub fn shutdown_handler(&self) -> ShutdownHandler<F> {
        ShutdownHandler::new(&self.shared)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Idle resources ready for reuse
    pub fn cached_count(&self) -> usize {
        self.shared.cache.len()
    }

    /// Live resources, idle or checked out
    pub fn extant_count(&self) -> usize {
        self.shared.extant.lock().len()
    }

    /// Creation counter, including creations still in progress
    pub fn created_count(&self) -> usize {
        self.shared.created_count()
    }

    /// Callers currently blocked in `acquire`
    pub fn waiting_count(&self) -> usize {
        self.shared.waiters.lock().len()
    }

    pub fn configuration(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.shared.metrics_snapshot()
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let metrics = self.get_metrics();
        HealthStatus::new(
            metrics.cached_resources,
            metrics.extant_resources,
            metrics.waiting_callers,
            self.shared.config.max_extant,
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }
}

impl<F: ResourceFactory> Drop for ResourcePool<F> {
    fn drop(&mut self) {
        if let Some(mut maintenance) = self.maintenance.take() {
            maintenance.stop();
        }
        self.shared.shutdown();
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("max_cached", &self.shared.config.max_cached)
            .field("max_extant", &self.shared.config.max_extant)
            .field("cached", &self.cached_count())
            .field("created", &self.created_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

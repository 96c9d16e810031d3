//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Point-in-time view of a pool's counters and occupancy
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
///
/// {
///     let _res = pool.acquire().unwrap();
///     let metrics = pool.get_metrics();
///     assert_eq!(metrics.total_created, 1);
///     assert_eq!(metrics.checked_out_resources, 1);
/// }
///
/// assert_eq!(pool.get_metrics().cached_resources, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Resources created through the factory
    pub total_created: u64,

    /// Hand-outs served from the cache or from a release
    pub total_reused: u64,

    /// Resources given back by borrowers
    pub total_released: u64,

    /// Resources closed and removed from the pool
    pub total_discarded: u64,

    /// Factory `create` failures
    pub creation_failures: u64,

    /// Idle resources that failed validation
    pub validation_failures: u64,

    /// Factory `close` failures
    pub close_failures: u64,

    /// Times an acquire had to wait on an exhausted pool
    pub exhaustion_stalls: u64,

    /// Waits that ended in a timeout
    pub acquire_timeouts: u64,

    /// Current idle resources
    pub cached_resources: usize,

    /// Current live resources
    pub extant_resources: usize,

    /// Current borrowed resources
    pub checked_out_resources: usize,

    /// Callers currently blocked in acquire
    pub waiting_callers: usize,

    pub max_cached: usize,

    pub max_extant: usize,

    /// Live resources relative to `max_extant` (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_reused".to_string(), self.total_reused.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_discarded".to_string(), self.total_discarded.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("close_failures".to_string(), self.close_failures.to_string());
        metrics.insert("exhaustion_stalls".to_string(), self.exhaustion_stalls.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("cached_resources".to_string(), self.cached_resources.to_string());
        metrics.insert("extant_resources".to_string(), self.extant_resources.to_string());
        metrics.insert("checked_out_resources".to_string(), self.checked_out_resources.to_string());
        metrics.insert("waiting_callers".to_string(), self.waiting_callers.to_string());
        metrics.insert("max_cached".to_string(), self.max_cached.to_string());
        metrics.insert("max_extant".to_string(), self.max_extant.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Render metrics in the Prometheus text exposition format
    ///
    /// Every sample carries a `pool` label plus any extra `tags`.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::{MetricsExporter, PoolConfiguration, ResourceFactory, ResourcePool};
    /// use std::collections::HashMap;
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
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.get_metrics(), "db", Some(&tags)).unwrap();
    /// assert!(output.contains("resourcepool_resources_extant"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> crate::errors::PoolResult<String> {
        use crate::errors::PoolError;
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

        let to_error = |err: prometheus::Error| PoolError::Metrics(err.to_string());

        let mut labels = tags.cloned().unwrap_or_default();
        labels.insert("pool".to_string(), pool_name.to_string());
        let registry = Registry::new_custom(None, Some(labels)).map_err(to_error)?;

        let gauges = [
            ("resourcepool_resources_cached", "Current idle resources", metrics.cached_resources),
            ("resourcepool_resources_extant", "Current live resources", metrics.extant_resources),
            ("resourcepool_resources_checked_out", "Current borrowed resources", metrics.checked_out_resources),
            ("resourcepool_callers_waiting", "Callers blocked in acquire", metrics.waiting_callers),
            ("resourcepool_max_cached", "Configured idle resource limit", metrics.max_cached),
            ("resourcepool_max_extant", "Configured live resource limit", metrics.max_extant),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::new(name, help).map_err(to_error)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge)).map_err(to_error)?;
        }

        let utilization = Gauge::new("resourcepool_utilization", "Live resources relative to the limit")
            .map_err(to_error)?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization)).map_err(to_error)?;

        let counters = [
            ("resourcepool_created_total", "Resources created", metrics.total_created),
            ("resourcepool_reused_total", "Resources handed out again", metrics.total_reused),
            ("resourcepool_released_total", "Resources returned by borrowers", metrics.total_released),
            ("resourcepool_discarded_total", "Resources closed and removed", metrics.total_discarded),
            ("resourcepool_creation_failures_total", "Factory create failures", metrics.creation_failures),
            ("resourcepool_validation_failures_total", "Idle validation failures", metrics.validation_failures),
            ("resourcepool_close_failures_total", "Factory close failures", metrics.close_failures),
            ("resourcepool_exhaustion_stalls_total", "Acquires that waited on an exhausted pool", metrics.exhaustion_stalls),
            ("resourcepool_acquire_timeouts_total", "Acquires that timed out", metrics.acquire_timeouts),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::new(name, help).map_err(to_error)?;
            counter.inc_by(value);
            registry.register(Box::new(counter)).map_err(to_error)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(to_error)?;
        String::from_utf8(buffer).map_err(|err| PoolError::Metrics(err.to_string()))
    }
}

/// Internal metrics tracker
pub(crate) struct MetricsTracker {
    created: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
    creation_failures: AtomicU64,
    validation_failures: AtomicU64,
    close_failures: AtomicU64,
    exhaustion_stalls: AtomicU64,
    acquire_timeouts: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            creation_failures: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            close_failures: AtomicU64::new(0),
            exhaustion_stalls: AtomicU64::new(0),
            acquire_timeouts: AtomicU64::new(0),
        }
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_creation_failure(&self) {
        self.creation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhaustion_stall(&self) {
        self.exhaustion_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(
        &self,
        cached: usize,
        extant: usize,
        waiting: usize,
        max_cached: usize,
        max_extant: usize,
    ) -> PoolMetrics {
        let utilization = if max_extant > 0 {
            extant as f64 / max_extant as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_created: self.created.load(Ordering::Relaxed),
            total_reused: self.reused.load(Ordering::Relaxed),
            total_released: self.released.load(Ordering::Relaxed),
            total_discarded: self.discarded.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            exhaustion_stalls: self.exhaustion_stalls.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            cached_resources: cached,
            extant_resources: extant,
            checked_out_resources: extant.saturating_sub(cached),
            waiting_callers: waiting,
            max_cached,
            max_extant,
            utilization,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

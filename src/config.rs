//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::eviction::EvictionPolicy;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use esox_resourcepool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_cached(4)
///     .with_max_extant(16)
///     .with_maintenance_interval(Duration::from_secs(30))
///     .with_acquire_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.max_cached, 4);
/// assert_eq!(config.max_extant, 16);
/// assert_eq!(config.acquire_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of idle resources kept for reuse
    pub max_cached: usize,

    /// Maximum number of resources alive at the same time, idle or checked out
    pub max_extant: usize,

    /// How often the maintenance task inspects the oldest idle resource.
    /// `None` disables the background thread.
    pub maintenance_interval: Option<Duration>,

    /// Age rule the maintenance task applies before validating
    pub eviction: EvictionPolicy,

    /// Time budget handed to the factory when validating an idle resource
    pub validation_timeout: Duration,

    /// How long `acquire` waits on an exhausted pool. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_cached: 10,
            max_extant: 10,
            maintenance_interval: Some(Duration::from_secs(10)),
            eviction: EvictionPolicy::default(),
            validation_timeout: Duration::from_secs(5),
            acquire_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of idle resources
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_cached(2);
    ///
    /// assert_eq!(config.max_cached, 2);
    /// ```
    pub fn with_max_cached(mut self, count: usize) -> Self {
        self.max_cached = count;
        self
    }

    /// Set the maximum number of live resources
    pub fn with_max_extant(mut self, count: usize) -> Self {
        self.max_extant = count;
        self
    }

    /// Run maintenance on this period
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    /// Do not start a background maintenance thread
    pub fn without_maintenance(mut self) -> Self {
        self.maintenance_interval = None;
        self
    }

    /// Set the eviction policy
    pub fn with_eviction(mut self, policy: EvictionPolicy) -> Self {
        self.eviction = policy;
        self
    }

    /// Shorthand for `EvictionPolicy::IdleTimeout`
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.eviction = EvictionPolicy::IdleTimeout(timeout);
        self
    }

    /// Set the validation timeout
    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Bound how long `acquire` may block
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Check the configuration for values the pool cannot work with
    ///
    /// `max_cached` above `max_extant` is allowed; the extra cache slots can
    /// never fill up.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    ///
    /// assert!(PoolConfiguration::new().validate().is_ok());
    /// assert!(PoolConfiguration::new().with_max_extant(0).validate().is_err());
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_cached == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_cached must be greater than 0".to_string(),
            ));
        }
        if self.max_extant == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_extant must be greater than 0".to_string(),
            ));
        }
        if self.maintenance_interval.is_some_and(|d| d.is_zero()) {
            return Err(PoolError::InvalidConfiguration(
                "maintenance_interval must be greater than zero".to_string(),
            ));
        }
        if self.eviction.has_zero_limit() {
            return Err(PoolError::InvalidConfiguration(
                "eviction limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

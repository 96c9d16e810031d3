//! Eviction policies applied to idle resources by the maintenance task

use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default staleness threshold: ten minutes since the last hand-out
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// When a cached resource is considered too old to keep
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{EvictionPolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// // Retire anything created more than an hour ago
/// let config = PoolConfiguration::new()
///     .with_eviction(EvictionPolicy::TimeToLive(Duration::from_secs(3600)));
///
/// assert!(matches!(config.eviction, EvictionPolicy::TimeToLive(_)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EvictionPolicy {
    /// Never evict on age; only failed validation removes idle resources
    None,

    /// Resource expires once it was last handed out longer ago than this
    IdleTimeout(Duration),

    /// Resource expires once it was created longer ago than this
    TimeToLive(Duration),

    /// Either limit expires the resource
    Combined {
        ttl: Duration,
        idle_timeout: Duration,
    },
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::IdleTimeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl EvictionPolicy {
    /// Whether a resource with these timestamps has outlived the policy
    pub fn is_expired(&self, created_at: Instant, obtained_at: Instant) -> bool {
        self.is_expired_at(created_at, obtained_at, Instant::now())
    }

    pub(crate) fn is_expired_at(&self, created_at: Instant, obtained_at: Instant, now: Instant) -> bool {
        let age = now.saturating_duration_since(created_at);
        let idle = now.saturating_duration_since(obtained_at);

        match *self {
            EvictionPolicy::None => false,
            EvictionPolicy::IdleTimeout(timeout) => idle > timeout,
            EvictionPolicy::TimeToLive(ttl) => age > ttl,
            EvictionPolicy::Combined { ttl, idle_timeout } => age > ttl || idle > idle_timeout,
        }
    }

    pub(crate) fn has_zero_limit(&self) -> bool {
        match *self {
            EvictionPolicy::None => false,
            EvictionPolicy::IdleTimeout(d) | EvictionPolicy::TimeToLive(d) => d.is_zero(),
            EvictionPolicy::Combined { ttl, idle_timeout } => ttl.is_zero() || idle_timeout.is_zero(),
        }
    }
}

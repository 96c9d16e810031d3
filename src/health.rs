//! Health reporting for resource pools

/// Health status of a resource pool
///
/// A pool is unhealthy while callers are blocked waiting for a resource, or
/// when nearly every allowed resource is alive and none is idle.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::HealthStatus;
///
/// let health = HealthStatus::new(2, 4, 0, 10);
/// assert!(health.is_healthy());
/// assert_eq!(health.checked_out_resources, 2);
///
/// let exhausted = HealthStatus::new(0, 10, 3, 10);
/// assert!(!exhausted.is_healthy());
/// assert_eq!(exhausted.warning_count, 3);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Live resources relative to `max_extant` (0.0 to 1.0)
    pub utilization: f64,

    pub cached_resources: usize,

    pub extant_resources: usize,

    pub checked_out_resources: usize,

    /// Callers blocked in acquire
    pub waiting_callers: usize,

    pub max_extant: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Build a status from the pool's current occupancy
    pub fn new(cached: usize, extant: usize, waiting: usize, max_extant: usize) -> Self {
        let utilization = if max_extant > 0 {
            extant as f64 / max_extant as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 && cached == 0 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if extant >= max_extant && cached == 0 {
            warnings.push("Pool is exhausted".to_string());
            is_healthy = false;
        }

        if waiting > 0 {
            warnings.push(format!("{} caller(s) waiting for a resource", waiting));
            is_healthy = false;
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            cached_resources: cached,
            extant_resources: extant,
            checked_out_resources: extant.saturating_sub(cached),
            waiting_callers: waiting,
            max_extant,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

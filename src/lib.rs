//! # esox_resourcepool
//!
//! Bounded, thread-safe pool for expensive, stateful resources such as
//! database connections.
//!
//! ## Features
//!
//! - Hard limit on live resources (`max_extant`) and on idle ones (`max_cached`)
//! - FIFO reuse: the longest-idle resource is handed out first
//! - Blocking acquisition with first-come, first-served hand-off on exhaustion
//! - Optional acquire timeout and cancel-safe async acquisition
//! - Automatic return of resources via RAII (Drop trait)
//! - Background maintenance that retires stale or broken idle resources
//! - Shutdown handler that force-closes every resource on teardown
//! - Metrics, health status and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resourcepool::{PoolConfiguration, ResourceFactory, ResourcePool};
//! use std::io;
//! use std::time::Duration;
//!
//! struct Connection {
//!     peer: String,
//! }
//!
//! struct Connector {
//!     peer: String,
//! }
//!
//! impl ResourceFactory for Connector {
//!     type Resource = Connection;
//!     type Error = io::Error;
//!
//!     fn create(&self) -> io::Result<Connection> {
//!         Ok(Connection { peer: self.peer.clone() })
//!     }
//!
//!     fn validate(&self, _conn: &Connection, _timeout: Duration) -> bool {
//!         true
//!     }
//!
//!     fn close(&self, _conn: &Connection) -> io::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let config = PoolConfiguration::new().with_max_cached(2).with_max_extant(8);
//! let pool = ResourcePool::new(Connector { peer: "db:5432".into() }, config).unwrap();
//! {
//!     let conn = pool.acquire().unwrap();
//!     println!("Talking to {}", conn.peer);
//!     // Connection goes back to the pool when `conn` goes out of scope
//! }
//! assert_eq!(pool.cached_count(), 1);
//! ```

mod pool;
mod config;
mod factory;
mod metrics;
mod health;
mod eviction;
mod maintenance;
mod shutdown;
mod errors;

pub use pool::{ResourcePool, PooledResource};
pub use config::PoolConfiguration;
pub use factory::ResourceFactory;
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use health::HealthStatus;
pub use eviction::{EvictionPolicy, DEFAULT_IDLE_TIMEOUT};
pub use maintenance::MaintenanceOutcome;
pub use shutdown::ShutdownHandler;
pub use errors::{PoolError, PoolResult};

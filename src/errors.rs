//! Error types for the resource pool

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Failed to create resource: {0}")]
    Creation(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error("Timed out after {0:?} waiting for a resource")]
    Timeout(Duration),

    #[error("Pool has been shut down")]
    ShutDown,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to start maintenance task: {0}")]
    MaintenanceStart(String),

    #[error("Failed to export metrics: {0}")]
    Metrics(String),
}

impl PoolError {
    pub(crate) fn creation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PoolError::Creation(Arc::new(err))
    }

    /// Whether this error came from the resource factory
    pub fn is_creation(&self) -> bool {
        matches!(self, PoolError::Creation(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

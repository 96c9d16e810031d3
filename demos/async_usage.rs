//! Async usage: acquire from tasks, time out, hook Ctrl-C

use esox_resourcepool::{PoolConfiguration, PoolError, ResourceFactory, ResourcePool};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct Session {
    id: usize,
}

struct SessionFactory {
    next_id: AtomicUsize,
}

impl ResourceFactory for SessionFactory {
    type Resource = Session;
    type Error = Infallible;

    fn create(&self) -> Result<Session, Infallible> {
        Ok(Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn validate(&self, _session: &Session, _timeout: Duration) -> bool {
        true
    }

    fn close(&self, _session: &Session) -> Result<(), Infallible> {
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== esox_resourcepool - Async Examples ===\n");

    let config = PoolConfiguration::new()
        .with_max_cached(2)
        .with_max_extant(2)
        .with_acquire_timeout(Duration::from_millis(100));
    let factory = SessionFactory {
        next_id: AtomicUsize::new(0),
    };
    let pool = Arc::new(ResourcePool::new(factory, config).unwrap());
    let _ctrl_c = pool.shutdown_handler().on_ctrl_c();

    println!("1. Concurrent tasks:");
    let tasks: Vec<_> = (0..5)
        .map(|task| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let session = pool.acquire_async().await?;
                tokio::time::sleep(Duration::from_millis(10)).await;
                println!("   task {} used session {}", task, session.id);
                Ok::<_, PoolError>(())
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    println!("\n2. Timeout on an exhausted pool:");
    let _a = pool.acquire_async().await.unwrap();
    let _b = pool.acquire_async().await.unwrap();
    match pool.acquire_async().await {
        Err(err) => println!("   {}", err),
        Ok(_) => println!("   unexpectedly got a session"),
    }

    let metrics = pool.get_metrics();
    println!("\n   stalls: {}, timeouts: {}", metrics.exhaustion_stalls, metrics.acquire_timeouts);
}

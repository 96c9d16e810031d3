//! Basic usage examples for ResourcePool

use esox_resourcepool::{PoolConfiguration, ResourceFactory, ResourcePool};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Stand-in for a database connection
#[derive(Debug)]
struct Connection {
    id: usize,
    open: AtomicBool,
}

impl Connection {
    fn query(&self, sql: &str) -> String {
        format!("[conn {}] {}", self.id, sql)
    }
}

struct Database {
    url: String,
    next_id: AtomicUsize,
}

impl ResourceFactory for Database {
    type Resource = Connection;
    type Error = io::Error;

    fn create(&self) -> io::Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("   opening connection {} to {}", id, self.url);
        Ok(Connection {
            id,
            open: AtomicBool::new(true),
        })
    }

    fn validate(&self, conn: &Connection, _timeout: Duration) -> bool {
        conn.open.load(Ordering::Acquire)
    }

    fn close(&self, conn: &Connection) -> io::Result<()> {
        println!("   closing connection {}", conn.id);
        conn.open.store(false, Ordering::Release);
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== esox_resourcepool - Basic Examples ===\n");

    let config = PoolConfiguration::new()
        .with_max_cached(2)
        .with_max_extant(3)
        .with_maintenance_interval(Duration::from_secs(10));

    let database = Database {
        url: "postgres://localhost/app".to_string(),
        next_id: AtomicUsize::new(0),
    };
    let pool = Arc::new(ResourcePool::new(database, config).unwrap());

    // Example 1: Borrow and return
    borrow_and_return(&pool);

    // Example 2: Many threads, few connections
    contention(&pool);

    // Example 3: Metrics and health
    metrics_and_health(&pool);

    println!("\n4. Shutdown:");
    pool.shutdown();
}

fn borrow_and_return(pool: &ResourcePool<Database>) {
    println!("1. Borrow and return:");
    {
        let conn = pool.acquire().unwrap();
        println!("   {}", conn.query("SELECT 1"));
        // Returned to the pool when `conn` is dropped
    }
    let conn = pool.acquire().unwrap();
    println!("   reused: {}\n", conn.query("SELECT 2"));
}

fn contention(pool: &Arc<ResourcePool<Database>>) {
    println!("2. Six workers, three connections:");
    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let pool = Arc::clone(pool);
            thread::spawn(move || {
                let conn = pool.acquire().unwrap();
                thread::sleep(Duration::from_millis(20));
                println!("   worker {} -> {}", worker, conn.query("UPDATE jobs"));
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    println!("   extant: {}, cached: {}\n", pool.extant_count(), pool.cached_count());
}

fn metrics_and_health(pool: &ResourcePool<Database>) {
    println!("3. Metrics and health:");
    let health = pool.get_health_status();
    println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
    println!("   Utilization: {:.1}%", health.utilization * 100.0);

    let mut metrics: Vec<_> = pool.export_metrics().into_iter().collect();
    metrics.sort();
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
}

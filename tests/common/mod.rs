//! Shared test factory: hands out numbered fake connections and records
//! everything the pool asks of it.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use esox_resourcepool::{PoolConfiguration, ResourceFactory, ResourcePool};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("connection refused")]
    Refused,
    #[error("connection already closed")]
    AlreadyClosed,
}

#[derive(Debug)]
pub struct Conn {
    pub id: usize,
    open: AtomicBool,
    in_use: AtomicBool,
}

impl Conn {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mark the connection busy; panics if someone else already holds it
    pub fn claim(&self) {
        assert!(
            !self.in_use.swap(true, Ordering::SeqCst),
            "connection {} handed to two borrowers",
            self.id
        );
    }

    pub fn unclaim(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct TestFactory {
    next_id: AtomicUsize,
    live: AtomicUsize,
    pub peak_live: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_close: AtomicBool,
    pub invalid: Mutex<HashSet<usize>>,
    pub closed: Mutex<Vec<usize>>,
    /// When set, `create` meets this barrier twice: once on entry and once
    /// before it returns
    pub create_gate: Mutex<Option<Arc<Barrier>>>,
    /// Same as `create_gate`, for `validate`
    pub validate_gate: Mutex<Option<Arc<Barrier>>>,
}

impl TestFactory {
    pub fn created(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn closed_ids(&self) -> Vec<usize> {
        let mut ids = self.closed.lock().clone();
        ids.sort_unstable();
        ids
    }
}

impl ResourceFactory for TestFactory {
    type Resource = Conn;
    type Error = ConnError;

    fn create(&self) -> Result<Conn, ConnError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ConnError::Refused);
        }
        let gate = self.create_gate.lock().clone();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(Conn {
            id,
            open: AtomicBool::new(true),
            in_use: AtomicBool::new(false),
        })
    }

    fn validate(&self, conn: &Conn, _timeout: Duration) -> bool {
        let gate = self.validate_gate.lock().clone();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        conn.is_open() && !self.invalid.lock().contains(&conn.id)
    }

    fn close(&self, conn: &Conn) -> Result<(), ConnError> {
        if !conn.open.swap(false, Ordering::SeqCst) {
            return Err(ConnError::AlreadyClosed);
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.closed.lock().push(conn.id);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ConnError::AlreadyClosed);
        }
        Ok(())
    }
}

pub fn pool(max_cached: usize, max_extant: usize) -> ResourcePool<TestFactory> {
    pool_with(PoolConfiguration::new(), max_cached, max_extant)
}

pub fn pool_with(config: PoolConfiguration, max_cached: usize, max_extant: usize) -> ResourcePool<TestFactory> {
    let config = config
        .with_max_cached(max_cached)
        .with_max_extant(max_extant)
        .without_maintenance();
    ResourcePool::new(TestFactory::default(), config).expect("valid pool configuration")
}

use criterion::{Criterion, criterion_group, criterion_main};
use esox_resourcepool::{PoolConfiguration, ResourceFactory, ResourcePool};
use std::convert::Infallible;
use std::hint::black_box;
use std::time::Duration;

struct Noop;

impl ResourceFactory for Noop {
    type Resource = u64;
    type Error = Infallible;

    fn create(&self) -> Result<u64, Infallible> {
        Ok(42)
    }

    fn validate(&self, _resource: &u64, _timeout: Duration) -> bool {
        true
    }

    fn close(&self, _resource: &u64) -> Result<(), Infallible> {
        Ok(())
    }
}

fn acquire_release(c: &mut Criterion) {
    let config = PoolConfiguration::new()
        .with_max_cached(8)
        .with_max_extant(8)
        .without_maintenance();
    let pool = ResourcePool::new(Noop, config).unwrap();

    c.bench_function("acquire_release_cached", |b| {
        b.iter(|| {
            let res = pool.acquire().unwrap();
            black_box(*res);
        })
    });

    c.bench_function("acquire_release_batch", |b| {
        b.iter(|| {
            let held: Vec<_> = (0..8).map(|_| pool.acquire().unwrap()).collect();
            black_box(held.len());
        })
    });
}

criterion_group!(benches, acquire_release);
criterion_main!(benches);

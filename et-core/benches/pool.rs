#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use et_core::config::SystemConfig;
use et_core::event::Owner;
use et_core::ids::AttachmentId;
use et_core::map::BackingMap;
use et_core::pool::EventPool;
use std::sync::Arc;

fn setup() -> (Arc<EventPool>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = SystemConfig {
        num_events: 1024,
        event_size: 256,
        group_sizes: vec![1024],
        group_count: 1,
        ..SystemConfig::default()
    };
    let map = Arc::new(BackingMap::create(dir.path().join("et.map"), &config).unwrap());
    let pool = Arc::new(EventPool::new(map, &config, dir.path().join("temps")));
    (pool, dir)
}

fn acquire_release_cycle(c: &mut Criterion) {
    let (pool, _dir) = setup();
    let places = pool.all_places();
    let attach = AttachmentId(1);

    c.bench_function("pool acquire/release cycle", move |b| {
        b.iter(|| {
            for &place in &places {
                pool.acquire(place, 64, attach).unwrap();
                pool.with_descriptor_mut(place, |desc| desc.owner = Owner::System);
                black_box(pool.snapshot(place));
            }
        })
    });
}

criterion_group!(benches, acquire_release_cycle);
criterion_main!(benches);

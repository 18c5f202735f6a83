//! Benchmarks the hot path a `Guard` runs on every lookup: load a node's
//! `next` pointer, protect its address, and confirm the load is still
//! current (spec §4.2 `protect`). `Guard` itself is private to the crate, so
//! this drives it indirectly through `contains`, which is exactly the
//! public operation whose cost is dominated by that path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lockfree_order::{LinkedListSet, OrderedSet};

fn pin_and_load(c: &mut Criterion) {
    let set = LinkedListSet::new();
    for v in 0..1_024i32 {
        set.insert(v);
    }

    c.bench_function("contains/protect_and_load", |b| {
        b.iter(|| black_box(set.contains(&512)));
    });
}

criterion_group!(benches, pin_and_load);
criterion_main!(benches);

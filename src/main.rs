//! Stress-test driver for the two ordered-set back-ends (spec §6 "Driver
//! boundary"): spawns worker threads, each inserting a disjoint contiguous
//! sub-range of `[0, N)` into a shared set, then reports elapsed time, final
//! size, and a post-quiescence validation pass.
//!
//! ```text
//! lockfree-order [threads] [range]
//! ```
//!
//! Both arguments are optional and clamped to at least 1 if given as 0 or
//! negative; defaults are 4 worker threads and a range of 50000, matching
//! the original reference implementation's stress test.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use lockfree_order::{LinkedListSet, OrderedSet, SkipListSet, Validate};

const DEFAULT_THREADS: usize = 4;
const DEFAULT_RANGE: usize = 50_000;

/// Parses the positional argument at `idx`, falling back to `default` if
/// absent or unparseable, and clamping any supplied value to at least 1
/// (spec §6 "clamped to positive").
fn parse_arg(args: &[String], idx: usize, default: usize) -> usize {
    match args.get(idx).and_then(|s| s.parse::<i64>().ok()) {
        Some(v) => v.max(1) as usize,
        None => default,
    }
}

/// Spawns `threads` workers, each inserting a disjoint contiguous sub-range
/// of `[0, range)`, then reports elapsed time, final size, and validation.
fn stress<S>(name: &str, set: S, threads: usize, range: usize)
where
    S: OrderedSet<usize> + Validate + Send + Sync + 'static,
{
    println!("\n[{name}] {threads} threads, range [0, {range})");

    let set = Arc::new(set);
    let chunk = range / threads;

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let set = Arc::clone(&set);
            let lo = i * chunk;
            let hi = if i == threads - 1 { range } else { (i + 1) * chunk };
            thread::spawn(move || {
                for v in lo..hi {
                    set.insert(v);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }
    let elapsed = start.elapsed();

    println!("insertion done, size: {}", set.size());
    println!("elapsed: {:?}", elapsed);
    println!("validate: {}", if set.validate() { "OK" } else { "FAIL" });
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let threads = parse_arg(&args, 0, DEFAULT_THREADS);
    let range = parse_arg(&args, 1, DEFAULT_RANGE);

    stress("linked list", LinkedListSet::new(), threads, range);
    stress("skip list", SkipListSet::new(), threads, range);
}

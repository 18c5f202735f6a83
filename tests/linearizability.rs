//! Property 9 (spec §8): a recorded history of concurrent `insert`/`remove`/
//! `contains` calls against a real back-end must admit at least one
//! sequential ordering, consistent with real-time (an operation that
//! finished before another started must precede it), under which a plain
//! reference set implementation produces the exact same results the real
//! back-end returned.
//!
//! Each call is timed with `Instant::now()` around it on its own thread, so
//! every recorded event carries a `[start, end]` interval; the checker below
//! is the standard interval-respecting backtracking search (Wing & Gong),
//! memoized on the bitset of already-linearized events since, for a plain
//! set, the reference model's resulting membership depends only on *which*
//! inserts/removes have been applied so far, never on their relative order.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use lockfree_order::{LinkedListSet, OrderedSet, SkipListSet};

#[derive(Clone, Copy, Debug)]
enum OpKind {
    Insert(i64),
    Remove(i64),
    Contains(i64),
}

struct Event {
    kind: OpKind,
    start: Instant,
    end: Instant,
    result: bool,
}

/// Runs `threads` concurrent workers, each executing a short fixed script of
/// operations against `set` on a small shared key domain, and returns the
/// recorded history in no particular order.
fn record_history<S>(set: Arc<S>, scripts: Vec<Vec<OpKind>>) -> Vec<Event>
where
    S: OrderedSet<i64> + Send + Sync + 'static,
{
    let start_barrier = Arc::new(Barrier::new(scripts.len()));
    let events: Arc<std::sync::Mutex<Vec<Event>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    let handles: Vec<_> = scripts
        .into_iter()
        .map(|script| {
            let set = Arc::clone(&set);
            let start_barrier = Arc::clone(&start_barrier);
            let events = Arc::clone(&events);
            thread::spawn(move || {
                start_barrier.wait();
                let mut local = Vec::with_capacity(script.len());
                for kind in script {
                    let start = Instant::now();
                    let result = match kind {
                        OpKind::Insert(v) => set.insert(v),
                        OpKind::Remove(v) => set.remove(&v),
                        OpKind::Contains(v) => set.contains(&v),
                    };
                    let end = Instant::now();
                    local.push(Event { kind, start, end, result });
                }
                events.lock().unwrap().extend(local);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    Arc::try_unwrap(events).ok().unwrap().into_inner().unwrap()
}

/// A plain sequential reference model matching the public contract exactly.
#[derive(Clone, Default)]
struct Reference(HashSet<i64>);

impl Reference {
    fn apply(&mut self, kind: OpKind) -> bool {
        match kind {
            OpKind::Insert(v) => self.0.insert(v),
            OpKind::Remove(v) => self.0.remove(&v),
            OpKind::Contains(v) => self.0.contains(&v),
        }
    }
}

/// `true` iff `events` admits a real-time-respecting sequential ordering
/// under which `Reference` reproduces every recorded result.
fn is_linearizable(events: &[Event]) -> bool {
    let n = events.len();
    assert!(n <= 32, "bitmask search assumes at most 32 events");
    let mut dead_ends: HashSet<u32> = HashSet::new();
    search(events, 0u32, Reference::default(), &mut dead_ends)
}

fn search(events: &[Event], applied: u32, model: Reference, dead_ends: &mut HashSet<u32>) -> bool {
    let n = events.len();
    if applied.count_ones() as usize == n {
        return true;
    }
    if dead_ends.contains(&applied) {
        return false;
    }

    for i in 0..n {
        if applied & (1 << i) != 0 {
            continue;
        }
        // `i` may be linearized next only if no still-pending event fully
        // precedes it in real time (real-time order must be respected).
        let blocked = (0..n).any(|j| {
            j != i && applied & (1 << j) == 0 && events[j].end < events[i].start
        });
        if blocked {
            continue;
        }

        let mut candidate_model = model.clone();
        let observed = candidate_model.apply(events[i].kind);
        if observed != events[i].result {
            continue;
        }

        if search(events, applied | (1 << i), candidate_model, dead_ends) {
            return true;
        }
    }

    dead_ends.insert(applied);
    false
}

#[test]
fn linked_list_history_is_linearizable() {
    let set = Arc::new(LinkedListSet::new());
    let scripts = vec![
        vec![OpKind::Insert(1), OpKind::Contains(1), OpKind::Remove(1), OpKind::Contains(1)],
        vec![OpKind::Insert(2), OpKind::Insert(1), OpKind::Contains(2), OpKind::Remove(2)],
        vec![OpKind::Contains(1), OpKind::Insert(1), OpKind::Contains(2)],
    ];
    let history = record_history(set, scripts);
    assert!(is_linearizable(&history), "no valid sequential ordering reproduces this history");
}

#[test]
fn skip_list_history_is_linearizable() {
    let set = Arc::new(SkipListSet::new());
    let scripts = vec![
        vec![OpKind::Insert(10), OpKind::Remove(10), OpKind::Insert(10), OpKind::Contains(10)],
        vec![OpKind::Insert(20), OpKind::Contains(10), OpKind::Remove(20), OpKind::Contains(20)],
        vec![OpKind::Contains(10), OpKind::Insert(30), OpKind::Remove(10)],
    ];
    let history = record_history(set, scripts);
    assert!(is_linearizable(&history), "no valid sequential ordering reproduces this history");
}

/// A sanity check that the checker itself can actually detect a
/// non-linearizable history: two non-overlapping operations recorded with
/// a result that contradicts real-time order must be rejected.
#[test]
fn checker_rejects_history_violating_real_time_order() {
    let now = Instant::now();
    let later = now + std::time::Duration::from_millis(10);
    let events = vec![
        // finishes first, claims absence...
        Event { kind: OpKind::Contains(1), start: now, end: now, result: true },
        // ...but this insert starts only after the contains already returned.
        Event { kind: OpKind::Insert(1), start: later, end: later, result: true },
    ];
    assert!(!is_linearizable(&events));
}

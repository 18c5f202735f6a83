//! A lock-free probabilistic skip-list ordered set (spec §4.4).
//!
//! Every node carries a tower of `next` pointers, one per level it
//! participates in (`marked::AtomicMarkedPtr`, same one-bit-mark discipline
//! as the linked list). `head`/`tail` sentinels exist at every level
//! `0..MAX_LEVEL`; `head.next[i]` starts out equal to `tail` at every level.
//! A node is only retired once every level it was ever linked at has been
//! physically unlinked (`Node::unlinked`, spec §3 invariant 5 "reclamation
//! safety" and "fully unlinked").

use core::cmp;
use core::mem;
use core::ptr::NonNull;

use crate::sync::atomic::{AtomicUsize, Ordering};
use crate::sync::{thread_local, UnsafeCell};

use crate::marked::{AtomicMarkedPtr, MarkedPtr};
use crate::reclaim::{self, Guard};

/// Upper bound on tower height (spec §4.4: "a conventional value is between
/// 16 and 32"), matching `original_source/src/include/skip_list.h`'s
/// `MAX_LEVEL`.
const MAX_LEVEL: usize = 32;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Key
////////////////////////////////////////////////////////////////////////////////////////////////////

enum Key<T> {
    NegInf,
    Value(T),
    PosInf,
}

impl<T: Ord> Key<T> {
    #[inline]
    fn cmp_value(&self, value: &T) -> cmp::Ordering {
        match self {
            Key::NegInf => cmp::Ordering::Less,
            Key::PosInf => cmp::Ordering::Greater,
            Key::Value(v) => v.cmp(value),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Node
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Node<T> {
    key: Key<T>,
    top_level: usize,
    /// Count of levels (0..=top_level) that have been physically unlinked so
    /// far. Once it reaches `top_level + 1` the node is unreachable from
    /// `head` at every level and can be safely retired.
    unlinked: AtomicUsize,
    next: Box<[AtomicMarkedPtr<Node<T>>]>,
}

impl<T> Node<T> {
    fn sentinel(key: Key<T>) -> Self {
        let next = (0..MAX_LEVEL).map(|_| AtomicMarkedPtr::null()).collect();
        Self { key, top_level: MAX_LEVEL - 1, unlinked: AtomicUsize::new(0), next }
    }

    fn new(key: Key<T>, top_level: usize, succs: &[*mut Node<T>]) -> Self {
        let next =
            (0..=top_level).map(|i| AtomicMarkedPtr::new(MarkedPtr::make(succs[i], false))).collect();
        Self { key, top_level, unlinked: AtomicUsize::new(0), next }
    }

    /// Records that this node has been physically unlinked at one more
    /// level; retires the node once it has been unlinked at every level it
    /// was ever published on.
    fn on_level_unlinked(node: *mut Self) {
        let node_ref = unsafe { &*node };
        let prev = node_ref.unlinked.fetch_add(1, Ordering::AcqRel);
        if prev + 1 == node_ref.top_level + 1 {
            // SAFETY: unlinked from every level; no legitimate traversal
            // starting at `head` can reach it any more.
            unsafe { reclaim::retire(NonNull::new_unchecked(node)) };
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// per-thread level RNG (spec §4.4 "Randomness for level choice must be per-thread")
////////////////////////////////////////////////////////////////////////////////////////////////////

thread_local! {
    static LEVEL_RNG: UnsafeCell<rand::rngs::SmallRng> =
        UnsafeCell::new(rand::SeedableRng::from_entropy());
}

/// Draws a random tower height in `[0, MAX_LEVEL - 1]`: flip an unbiased
/// coin, incrementing on "up", stopping at the first "down" or at the cap.
fn random_level() -> usize {
    use rand::Rng;

    LEVEL_RNG.with(|cell| {
        let rng = unsafe { &mut *cell.get() };
        let mut level = 0;
        while level < MAX_LEVEL - 1 && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// SkipListSet
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock-free ordered set backed by a multi-level skip list.
pub struct SkipListSet<T> {
    head: NonNull<Node<T>>,
    /// A monotonically non-decreasing hint for the highest level any node
    /// currently reaches; may safely overestimate (spec §9 "Skip-list level
    /// bookkeeping"). Bumped by `insert` before searching, so `find`'s
    /// descent always covers every level a concurrently-forming tower needs.
    top_level_hint: AtomicUsize,
}

unsafe impl<T: Send> Send for SkipListSet<T> {}
unsafe impl<T: Send + Sync> Sync for SkipListSet<T> {}

/// Per-thread hazard pointers backing `find`'s `preds`/`succs` arrays.
///
/// Each level gets its own dedicated slot in both arrays. `find` descends
/// level by level, reusing only the *current* level's pair while it walks
/// that level (the standard hand-over-hand protect-then-advance dance), but
/// once a level settles it never touches that level's slots again -- so
/// `preds[level]`/`succs[level]` stay hazard-protected for as long as the
/// caller holds onto them, including the upper levels `insert`'s tower-
/// linking loop revisits well after `find` has returned. A pair of shared
/// guards handed down across levels cannot provide that: by the time the
/// descent reaches level 0, the two guards have long since been re-pointed
/// at lower-level nodes, leaving every level above unprotected.
struct SearchGuards {
    preds: [Guard; MAX_LEVEL],
    succs: [Guard; MAX_LEVEL],
}

thread_local! {
    static GUARDS: UnsafeCell<SearchGuards> = UnsafeCell::new(SearchGuards {
        preds: core::array::from_fn(|_| Guard::new()),
        succs: core::array::from_fn(|_| Guard::new()),
    });
}

impl<T> Default for SkipListSet<T>
where
    T: Ord + 'static,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SkipListSet<T>
where
    T: Ord + 'static,
{
    /// Creates an empty set, allocating the permanent `head`/`tail`
    /// sentinels at every level `0..MAX_LEVEL`.
    pub fn new() -> Self {
        let tail = Box::into_raw(Box::new(Node::sentinel(Key::PosInf)));
        let head_node = Node::sentinel(Key::NegInf);
        for slot in head_node.next.iter() {
            slot.store(MarkedPtr::make(tail, false), Ordering::Relaxed);
        }
        let head = Box::into_raw(Box::new(head_node));

        // SAFETY: just allocated, never null.
        Self { head: unsafe { NonNull::new_unchecked(head) }, top_level_hint: AtomicUsize::new(0) }
    }

    fn bump_top_level_hint(&self, new_top: usize) {
        let mut current = self.top_level_hint.load(Ordering::Relaxed);
        while new_top > current {
            match self.top_level_hint.compare_exchange_weak(
                current,
                new_top,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Inserts `value`, returning `true` if it was not already present.
    pub fn insert(&self, value: T) -> bool {
        GUARDS.with(|cell| {
            let guards = unsafe { &mut *cell.get() };
            let top_level = random_level();
            // bumped before searching so `find`'s descent already covers
            // every level this tower needs (spec §9 "lazily bump it with a
            // CAS that never decreases it").
            self.bump_top_level_hint(top_level);

            let mut preds = [core::ptr::null_mut::<Node<T>>(); MAX_LEVEL];
            let mut succs = [core::ptr::null_mut::<Node<T>>(); MAX_LEVEL];

            if self.find(&value, &mut preds, &mut succs, &mut guards.preds, &mut guards.succs) {
                return false;
            }

            let node_ptr = Box::into_raw(Box::new(Node::new(Key::Value(value), top_level, &succs)));
            let value_of = |ptr: *mut Node<T>| match unsafe { &(*ptr).key } {
                Key::Value(v) => v as *const T,
                _ => unreachable!("freshly allocated node always holds a real value"),
            };

            // level 0: the linearization point of `insert`.
            loop {
                let pred0 = unsafe { &*preds[0] };
                let expected = MarkedPtr::make(succs[0], false);
                let desired = MarkedPtr::make(node_ptr, false);
                if pred0
                    .next[0]
                    .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }

                let value_ref = unsafe { &*value_of(node_ptr) };
                if self.find(value_ref, &mut preds, &mut succs, &mut guards.preds, &mut guards.succs) {
                    // SAFETY: never published, exclusively owned by this call.
                    drop(unsafe { Box::from_raw(node_ptr) });
                    return false;
                }
                for i in 0..=top_level {
                    unsafe {
                        (*node_ptr).next[i].store(MarkedPtr::make(succs[i], false), Ordering::Relaxed)
                    };
                }
            }

            // upper levels: become visible lazily; any subsequent `find`
            // restores them (or unlinks the node if it was concurrently
            // marked at level 0 in the meantime). `preds[level]` here is
            // still the exact node `find` left hazard-protected in
            // `guards.preds[level]`/`guards.succs[level]`, so dereferencing
            // it this long after `find` returned is safe.
            for level in 1..=top_level {
                loop {
                    let pred_l = unsafe { &*preds[level] };
                    let expected = MarkedPtr::make(succs[level], false);
                    let desired = MarkedPtr::make(node_ptr, false);
                    if pred_l
                        .next[level]
                        .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        break;
                    }

                    let value_ref = unsafe { &*value_of(node_ptr) };
                    if !self.find(value_ref, &mut preds, &mut succs, &mut guards.preds, &mut guards.succs) {
                        // concurrently removed before we finished linking the
                        // tower; stop, a future `find` will unlink what we
                        // already published.
                        return true;
                    }
                }
            }

            true
        })
    }

    /// Removes `value`, returning `true` if it was present.
    pub fn remove(&self, value: &T) -> bool {
        GUARDS.with(|cell| {
            let guards = unsafe { &mut *cell.get() };
            let mut preds = [core::ptr::null_mut::<Node<T>>(); MAX_LEVEL];
            let mut succs = [core::ptr::null_mut::<Node<T>>(); MAX_LEVEL];

            if !self.find(value, &mut preds, &mut succs, &mut guards.preds, &mut guards.succs) {
                return false;
            }
            let victim = succs[0];
            let victim_ref = unsafe { &*victim };

            for level in (1..=victim_ref.top_level).rev() {
                loop {
                    let current = victim_ref.next[level].load(Ordering::Acquire);
                    if current.is_marked() {
                        break;
                    }
                    let marked = MarkedPtr::make(current.raw(), true);
                    if victim_ref.next[level].compare_exchange(current, marked, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                        break;
                    }
                }
            }

            loop {
                let succ = victim_ref.next[0].load(Ordering::Acquire);
                if succ.is_marked() {
                    return false;
                }
                let marked = MarkedPtr::make(succ.raw(), true);
                // logical deletion at level 0: the linearization point of `remove`
                match victim_ref.next[0].compare_exchange(succ, marked, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        let preds0 = unsafe { &*preds[0] };
                        let unlink_expected = MarkedPtr::make(victim, false);
                        let unlinked = MarkedPtr::make(succ.raw(), false);
                        if preds0
                            .next[0]
                            .compare_exchange(unlink_expected, unlinked, Ordering::AcqRel, Ordering::Relaxed)
                            .is_ok()
                        {
                            Node::on_level_unlinked(victim);
                        }
                        return true;
                    }
                    Err(observed) => {
                        if observed.is_marked() {
                            return false;
                        }
                        // successor changed under us; retry the mark CAS
                    }
                }
            }
        })
    }

    /// Returns `true` if `value` is a current member of the set.
    pub fn contains(&self, value: &T) -> bool {
        let mut pred_guard = Guard::new();
        let mut curr_guard = Guard::new();
        let mut pred: *mut Node<T> = self.head.as_ptr();
        let top = self.top_level_hint.load(Ordering::Acquire);

        for level in (0..=top).rev() {
            loop {
                let curr_marked = curr_guard.protect(&unsafe { &*pred }.next[level], Ordering::Acquire);
                let curr = curr_marked.raw();
                let curr_node = unsafe { &*curr };

                if curr_node.key.cmp_value(value) == cmp::Ordering::Less {
                    pred = curr;
                    mem::swap(&mut pred_guard, &mut curr_guard);
                } else {
                    break;
                }
            }
        }

        let curr_marked = curr_guard.protect(&unsafe { &*pred }.next[0], Ordering::Acquire);
        let curr = curr_marked.raw();
        let curr_node = unsafe { &*curr };
        curr_node.key.cmp_value(value) == cmp::Ordering::Equal
            && !curr_node.next[0].load(Ordering::Acquire).is_marked()
    }

    /// Returns the number of live (unmarked) elements at level 0.
    ///
    /// Not linearizable (spec §5).
    pub fn size(&self) -> usize {
        let mut pred_guard = Guard::new();
        let mut curr_guard = Guard::new();
        let mut pred: *mut Node<T> = self.head.as_ptr();
        let mut count = 0usize;

        loop {
            let curr_marked = curr_guard.protect(&unsafe { &*pred }.next[0], Ordering::Acquire);
            let curr = curr_marked.raw();
            let curr_node = unsafe { &*curr };

            if matches!(curr_node.key, Key::PosInf) {
                return count;
            }
            if !curr_node.next[0].load(Ordering::Acquire).is_marked() {
                count += 1;
            }

            pred = curr;
            mem::swap(&mut pred_guard, &mut curr_guard);
        }
    }

    /// Diagnostic check of spec §8 properties 2-5: strictly increasing
    /// per-level chains bounded by sentinels, no marked residue, no
    /// duplicates at level 0, and every node reachable above level 0 is also
    /// reachable at level 0 (tower consistency). Single-threaded use only,
    /// once all mutators have quiesced.
    pub fn validate(&self) -> bool {
        let mut live: Vec<*const T> = Vec::new();
        let mut pred: *const Node<T> = self.head.as_ptr();
        let mut prev_value: Option<&T> = None;

        loop {
            let curr = unsafe { &*pred }.next[0].load(Ordering::Relaxed);
            if curr.is_marked() {
                return false;
            }
            let curr_node = unsafe { &*curr.raw() };
            match &curr_node.key {
                Key::PosInf => break,
                Key::NegInf => return false,
                Key::Value(v) => {
                    if let Some(prev) = prev_value {
                        if v <= prev {
                            return false;
                        }
                    }
                    prev_value = Some(v);
                    live.push(v as *const T);
                }
            }
            pred = curr.raw();
        }

        let top = self.top_level_hint.load(Ordering::Relaxed);
        for level in 1..=top {
            let mut pred: *const Node<T> = self.head.as_ptr();
            let mut prev_value: Option<&T> = None;
            loop {
                let curr = unsafe { &*pred }.next[level].load(Ordering::Relaxed);
                if curr.is_marked() {
                    return false;
                }
                let curr_node = unsafe { &*curr.raw() };
                match &curr_node.key {
                    Key::PosInf => break,
                    Key::NegInf => return false,
                    Key::Value(v) => {
                        if let Some(prev) = prev_value {
                            if v <= prev {
                                return false;
                            }
                        }
                        prev_value = Some(v);
                        if !live.contains(&(v as *const T)) {
                            return false;
                        }
                    }
                }
                pred = curr.raw();
            }
        }

        true
    }

    /// Searches for `value`, filling `preds[0..=top]`/`succs[0..=top]`
    /// (spec §4.4 `find`), physically unlinking any marked node it
    /// encounters at any level along the way.
    ///
    /// `pred_guards[level]`/`succ_guards[level]` are left holding a live
    /// hazard pointer on `preds[level]`/`succs[level]` for every level
    /// `0..=top`, even after this call returns -- callers that keep
    /// dereferencing `preds[]`/`succs[]` well after `find` has returned
    /// (`insert`'s upper-level tower-linking loop) rely on this.
    ///
    /// Returns `true` iff `succs[0].key == value`.
    fn find(
        &self,
        value: &T,
        preds: &mut [*mut Node<T>; MAX_LEVEL],
        succs: &mut [*mut Node<T>; MAX_LEVEL],
        pred_guards: &mut [Guard; MAX_LEVEL],
        succ_guards: &mut [Guard; MAX_LEVEL],
    ) -> bool {
        'retry: loop {
            let mut pred: *mut Node<T> = self.head.as_ptr();
            let top = self.top_level_hint.load(Ordering::Acquire);

            for level in (0..=top).rev() {
                // `pred` is already hazard-protected here: either it is
                // `head` (permanent, no guard needed), or it is the `pred`
                // this same level-loop just recorded for the level above,
                // still held live by whichever slot captured it there.
                let curr_marked = succ_guards[level].protect(&unsafe { &*pred }.next[level], Ordering::Acquire);
                let mut curr = curr_marked.raw();

                loop {
                    let curr_node = unsafe { &*curr };
                    let (succ_raw, succ_mark) = curr_node.next[level].load(Ordering::Acquire).unpack();

                    if succ_mark {
                        let pred_node = unsafe { &*pred };
                        let expected = MarkedPtr::make(curr, false);
                        let desired = MarkedPtr::make(succ_raw, false);
                        if pred_node
                            .next[level]
                            .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Relaxed)
                            .is_err()
                        {
                            continue 'retry;
                        }

                        Node::on_level_unlinked(curr);

                        let reprotected = succ_guards[level].protect(&pred_node.next[level], Ordering::Acquire);
                        curr = reprotected.raw();
                        continue;
                    }

                    if curr_node.key.cmp_value(value) != cmp::Ordering::Less {
                        break;
                    }

                    // `curr` becomes the new `pred` for the rest of this
                    // level's walk; promote its protection out of
                    // `succ_guards[level]` into `pred_guards[level]` (a
                    // plain swap, no reload needed -- the address hasn't
                    // changed, only its role has) before re-using
                    // `succ_guards[level]` for the next candidate.
                    mem::swap(&mut pred_guards[level], &mut succ_guards[level]);
                    pred = curr;
                    let next_marked = succ_guards[level].protect(&curr_node.next[level], Ordering::Acquire);
                    curr = next_marked.raw();
                }

                preds[level] = pred;
                succs[level] = curr;
                // Neither slot for `level` is touched again after this
                // point, so `preds[level]`/`succs[level]` remain protected
                // for as long as the caller holds onto `pred_guards`/
                // `succ_guards` -- across the whole descent to level 0 and
                // beyond, until the next `find` call reuses these slots.
            }

            let found = unsafe { &*succs[0] }.key.cmp_value(value) == cmp::Ordering::Equal;
            return found;
        }
    }
}

impl<T> Drop for SkipListSet<T> {
    fn drop(&mut self) {
        // not concurrent: spec §7 requires the caller to guarantee quiescence
        // before a set is dropped. Every node is reachable exactly once at
        // level 0, so walking that single chain frees everything without
        // double-freeing towers.
        let mut curr: *mut Node<T> = self.head.as_ptr();
        while !curr.is_null() {
            let node = unsafe { Box::from_raw(curr) };
            curr = node.next[0].load(Ordering::Relaxed).raw();
        }
    }
}

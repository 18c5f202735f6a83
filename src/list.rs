//! A Harris-style lock-free ordered linked list (spec §4.3).
//!
//! Nodes are threaded through a single `next` pointer that also carries a
//! one-bit "logically deleted" mark (`marked::AtomicMarkedPtr`). `head` and
//! `tail` are permanent sentinels holding `-inf`/`+inf` keys that bound every
//! traversal and are never marked, removed, or reclaimed.

use core::cmp;
use core::ptr::NonNull;

use crate::sync::atomic::Ordering;
use crate::sync::{thread_local, UnsafeCell};

use crate::marked::{AtomicMarkedPtr, MarkedPtr};
use crate::reclaim::{self, Guard};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Key
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A node's key: a real element, or one of the two sentinel endpoints that
/// compare less/greater than any real element (spec §3 "Sentinels").
enum Key<T> {
    NegInf,
    Value(T),
    PosInf,
}

impl<T: Ord> Key<T> {
    /// Compares this key against a real value being searched for.
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
    next: AtomicMarkedPtr<Node<T>>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// LinkedListSet
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock-free ordered set backed by a Harris-style linked list.
pub struct LinkedListSet<T> {
    head: NonNull<Node<T>>,
}

// SAFETY: nodes are only ever reachable through atomics guarded by hazard
// pointers; `T` crossing threads (via retire, or via `&T` handed to readers
// on other threads) is the only requirement beyond that.
unsafe impl<T: Send> Send for LinkedListSet<T> {}
unsafe impl<T: Send + Sync> Sync for LinkedListSet<T> {}

thread_local! {
    static GUARDS: UnsafeCell<(Guard, Guard)> = UnsafeCell::new((Guard::new(), Guard::new()));
}

impl<T> Default for LinkedListSet<T>
where
    T: Ord + 'static,
{
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkedListSet<T>
where
    T: Ord + 'static,
{
    /// Creates an empty set, allocating the permanent `head`/`tail`
    /// sentinels.
    pub fn new() -> Self {
        let tail = Box::into_raw(Box::new(Node { key: Key::PosInf, next: AtomicMarkedPtr::null() }));
        let head = Box::into_raw(Box::new(Node {
            key: Key::NegInf,
            next: AtomicMarkedPtr::new(MarkedPtr::make(tail, false)),
        }));

        // SAFETY: just allocated, never null.
        Self { head: unsafe { NonNull::new_unchecked(head) } }
    }

    /// Inserts `value`, returning `true` if it was not already present.
    pub fn insert(&self, value: T) -> bool {
        GUARDS.with(|cell| {
            let (pred_guard, curr_guard) = unsafe { &mut *cell.get() };
            let node_ptr =
                Box::into_raw(Box::new(Node { key: Key::Value(value), next: AtomicMarkedPtr::null() }));

            loop {
                let value_ref = match unsafe { &(*node_ptr).key } {
                    Key::Value(v) => v,
                    _ => unreachable!("freshly allocated node always holds a real value"),
                };

                let (pred, curr, found) = self.find(value_ref, pred_guard, curr_guard);
                if found {
                    // SAFETY: never published, exclusively owned by this call.
                    drop(unsafe { Box::from_raw(node_ptr) });
                    return false;
                }

                // SAFETY: not yet published, exclusively owned by this call.
                unsafe { (*node_ptr).next.store(MarkedPtr::make(curr, false), Ordering::Relaxed) };

                let pred_node = unsafe { &*pred };
                let expected = MarkedPtr::make(curr, false);
                let desired = MarkedPtr::make(node_ptr, false);
                // this `Release` CAS synchronizes-with the `Acquire` protect load in `find`
                if pred_node
                    .next
                    .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
            }
        })
    }

    /// Removes `value`, returning `true` if it was present.
    pub fn remove(&self, value: &T) -> bool {
        GUARDS.with(|cell| {
            let (pred_guard, curr_guard) = unsafe { &mut *cell.get() };

            loop {
                let (pred, curr, found) = self.find(value, pred_guard, curr_guard);
                if !found {
                    return false;
                }

                let curr_node = unsafe { &*curr };
                let succ = curr_node.next.load(Ordering::Acquire);
                let expected = MarkedPtr::make(succ.raw(), false);
                let marked = MarkedPtr::make(succ.raw(), true);

                // logical deletion: the linearization point of `remove`
                match curr_node.next.compare_exchange(expected, marked, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        let pred_node = unsafe { &*pred };
                        let unlink_expected = MarkedPtr::make(curr, false);
                        let unlinked = MarkedPtr::make(succ.raw(), false);
                        if pred_node
                            .next
                            .compare_exchange(unlink_expected, unlinked, Ordering::AcqRel, Ordering::Relaxed)
                            .is_ok()
                        {
                            // SAFETY: physically unlinked, unreachable from any legitimate
                            // traversal from here on; `find` will never encounter it again.
                            unsafe { reclaim::retire(NonNull::new_unchecked(curr)) };
                        }
                        return true;
                    }
                    Err(observed) => {
                        if observed.is_marked() {
                            // another thread already deleted this value
                            return false;
                        }
                        // successor changed under us; re-find and retry
                    }
                }
            }
        })
    }

    /// Returns `true` if `value` is a current member of the set.
    pub fn contains(&self, value: &T) -> bool {
        // Two guards, hand-over-hand: `curr_guard` is only ever re-protected
        // while the node it walks away from is still kept alive by
        // `pred_guard` (the sentinel `head` never needs protection at all).
        let mut pred_guard = Guard::new();
        let mut curr_guard = Guard::new();
        let mut pred: *const Node<T> = self.head.as_ptr();

        loop {
            let curr_marked = curr_guard.protect(&unsafe { &*pred }.next, Ordering::Acquire);
            let curr = curr_marked.raw();
            let curr_node = unsafe { &*curr };

            match curr_node.key.cmp_value(value) {
                cmp::Ordering::Less => {
                    pred = curr;
                    core::mem::swap(&mut pred_guard, &mut curr_guard);
                }
                cmp::Ordering::Equal => {
                    return !curr_node.next.load(Ordering::Acquire).is_marked();
                }
                cmp::Ordering::Greater => return false,
            }
        }
    }

    /// Returns the number of live (unmarked) elements.
    ///
    /// Not linearizable: the count may over- or under-count elements whose
    /// insertion or removal is concurrently in flight (spec §5).
    pub fn size(&self) -> usize {
        let mut pred_guard = Guard::new();
        let mut curr_guard = Guard::new();
        let mut pred: *const Node<T> = self.head.as_ptr();
        let mut count = 0usize;

        loop {
            let curr_marked = curr_guard.protect(&unsafe { &*pred }.next, Ordering::Acquire);
            let curr = curr_marked.raw();
            let curr_node = unsafe { &*curr };

            if matches!(curr_node.key, Key::PosInf) {
                return count;
            }

            if !curr_node.next.load(Ordering::Acquire).is_marked() {
                count += 1;
            }

            pred = curr;
            core::mem::swap(&mut pred_guard, &mut curr_guard);
        }
    }

    /// Diagnostic check that the chain is a valid, strictly increasing set
    /// with no marked residue. Intended for single-threaded use once all
    /// mutators have quiesced (spec §8 properties 2-4).
    pub fn validate(&self) -> bool {
        let mut pred_guard = Guard::new();
        let mut curr_guard = Guard::new();
        let mut pred: *const Node<T> = self.head.as_ptr();
        let mut prev_value: Option<&T> = None;

        loop {
            let curr_marked = curr_guard.protect(&unsafe { &*pred }.next, Ordering::Acquire);
            let curr = curr_marked.raw();
            let curr_node = unsafe { &*curr };

            match &curr_node.key {
                Key::PosInf => return true,
                Key::NegInf => return false,
                Key::Value(v) => {
                    if curr_node.next.load(Ordering::Acquire).is_marked() {
                        return false;
                    }
                    if let Some(prev) = prev_value {
                        if v <= prev {
                            return false;
                        }
                    }
                    prev_value = Some(v);
                }
            }

            pred = curr;
            core::mem::swap(&mut pred_guard, &mut curr_guard);
        }
    }

    /// Searches for `value`, physically unlinking any marked nodes
    /// encountered along the way (spec §4.3 `find`).
    ///
    /// Returns `(pred, curr, found)` where `pred.key < value <= curr.key`
    /// and `found` is `true` iff `curr.key == value`.
    fn find(
        &self,
        value: &T,
        pred_guard: &mut Guard,
        curr_guard: &mut Guard,
    ) -> (*mut Node<T>, *mut Node<T>, bool) {
        'retry: loop {
            pred_guard.release();
            let mut pred: *mut Node<T> = self.head.as_ptr();

            let curr_marked = curr_guard.protect(&unsafe { &*pred }.next, Ordering::Acquire);
            let mut curr = curr_marked.raw();

            loop {
                let curr_node = unsafe { &*curr };
                let succ = curr_node.next.load(Ordering::Acquire);
                let (succ_raw, succ_mark) = succ.unpack();

                if succ_mark {
                    let pred_node = unsafe { &*pred };
                    let expected = MarkedPtr::make(curr, false);
                    let desired = MarkedPtr::make(succ_raw, false);
                    if pred_node
                        .next
                        .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Relaxed)
                        .is_err()
                    {
                        continue 'retry;
                    }

                    // SAFETY: physically unlinked; no legitimate traversal can reach it again.
                    unsafe { reclaim::retire(NonNull::new_unchecked(curr)) };

                    let reprotected = curr_guard.protect(&pred_node.next, Ordering::Acquire);
                    curr = reprotected.raw();
                    continue;
                }

                if curr_node.key.cmp_value(value) != cmp::Ordering::Less {
                    let found = curr_node.key.cmp_value(value) == cmp::Ordering::Equal;
                    return (pred, curr, found);
                }

                pred = curr;
                core::mem::swap(pred_guard, curr_guard);
                let next_marked = curr_guard.protect(&curr_node.next, Ordering::Acquire);
                curr = next_marked.raw();
            }
        }
    }
}

impl<T> Drop for LinkedListSet<T> {
    fn drop(&mut self) {
        // not concurrent: spec §7 requires the caller to guarantee quiescence
        // before a set is dropped.
        let mut curr: *mut Node<T> = self.head.as_ptr();
        while !curr.is_null() {
            let node = unsafe { Box::from_raw(curr) };
            curr = node.next.load(Ordering::Relaxed).raw();
        }
    }
}

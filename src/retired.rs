//! Caching for retired records until they can be safely dropped and
//! deallocated.
//!
//! # Retired and Retired Bags
//!
//! A retired record's address and drop glue are captured in a `Retired`. Only
//! its concrete `Drop` implementation is actually needed once a record is
//! retired, so `Retired` keeps a type-erased pointer plus a drop-glue function
//! pointer instead of any generic type parameter. These are cached in
//! `RetiredBag`s and removed (dropped and de-allocated) only once no thread's
//! hazard pointer still protects the same address (spec §4.2).
//!
//! # Abandoned Bags
//!
//! When a thread exits it attempts to reclaim all of its retired records.
//! Some may remain un-reclaimed because another thread still protects them;
//! in that case the exiting thread's bag is abandoned onto a global queue.
//! Other threads occasionally adopt abandoned bags, taking over the
//! responsibility of eventually reclaiming their contents.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use core::cmp;
use core::fmt;
use core::mem;
use core::ptr::NonNull;

use crate::hazard::Protected;
use crate::queue::{RawNode, RawQueue};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Retired
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A type-erased pointer to a retired record together with the drop glue
/// needed to reclaim it.
pub(crate) struct Retired {
    ptr: NonNull<()>,
    drop_fn: unsafe fn(NonNull<()>),
}

impl Retired {
    /// Captures `ptr` as a retired record of type `T`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated via `Box<T>` and must not be
    /// dereferenced or deallocated by anyone else afterwards; ownership
    /// passes to the returned `Retired`.
    #[inline]
    pub(crate) unsafe fn new_unchecked<T>(ptr: NonNull<T>) -> Self {
        unsafe fn drop_boxed<T>(ptr: NonNull<()>) {
            drop(Box::from_raw(ptr.cast::<T>().as_ptr()));
        }

        Self { ptr: ptr.cast(), drop_fn: drop_boxed::<T> }
    }

    /// The retired record's address, used to compare against hazard pointers.
    #[inline]
    pub(crate) fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Drops and deallocates the retired record.
    ///
    /// # Safety
    ///
    /// Must only be called once no hazard pointer protects this record's
    /// address any more.
    #[inline]
    pub(crate) unsafe fn reclaim(self) {
        (self.drop_fn)(self.ptr);
    }
}

impl fmt::Debug for Retired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retired").field("address", &self.ptr.as_ptr()).finish()
    }
}

// SAFETY: a `Retired` exclusively owns the record it points to; moving that
// ownership across threads (e.g. onto the global abandoned-bags queue) is
// sound as long as the record type itself permits being dropped from another
// thread, which every node type in this crate does.
unsafe impl Send for Retired {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ReclaimOnDrop
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub(crate) struct ReclaimOnDrop(Option<Retired>);

impl ReclaimOnDrop {
    /// Compares the address of `protected` with the address of `self`.
    ///
    /// This is used for binary search, so the argument order may matter!
    #[inline]
    pub(crate) fn compare_with(&self, protected: Protected) -> cmp::Ordering {
        protected.address().cmp(&self.0.as_ref().expect("not yet reclaimed").address())
    }
}

impl From<Retired> for ReclaimOnDrop {
    #[inline]
    fn from(retired: Retired) -> Self {
        Self(Some(retired))
    }
}

impl Drop for ReclaimOnDrop {
    #[inline]
    fn drop(&mut self) {
        // safe because `RetiredBag`s are only ever dropped/cleared from
        // `Local`'s scan, after the address has been confirmed unprotected.
        if let Some(retired) = self.0.take() {
            unsafe { retired.reclaim() };
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetiredBag
////////////////////////////////////////////////////////////////////////////////////////////////////

/// List for caching retired records before they can be finally
/// dropped/deallocated.
///
/// This type also doubles as a node in the global queue of abandoned bags
/// (see [`AbandonedBags`]). The internal cache uses a `Vec`, which will have
/// to be reallocated if too many records are retired before a scan runs.
#[derive(Debug)]
pub(crate) struct RetiredBag {
    pub(crate) inner: Vec<ReclaimOnDrop>,
    next: *mut RetiredBag,
}

impl RetiredBag {
    const DEFAULT_CAPACITY: usize = 256;

    /// Creates a new `RetiredBag` with default capacity for retired records.
    #[inline]
    pub(crate) fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates a new `RetiredBag` with the given initial capacity, as
    /// configured through [`Config::init_cache`](crate::config::Config::init_cache).
    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { inner: Vec::with_capacity(capacity), next: core::ptr::null_mut() }
    }

    /// Merges `self` with the given other `Vec`, which is then dropped.
    ///
    /// If `other` has substantially more free capacity than `self`, the two
    /// vectors are swapped before merging so the larger buffer survives,
    /// deferring future re-allocations.
    #[inline]
    pub(crate) fn merge(&mut self, mut other: Vec<ReclaimOnDrop>) {
        if (other.capacity() - other.len()) > self.inner.capacity() {
            mem::swap(&mut self.inner, &mut other);
        }

        self.inner.append(&mut other);
    }
}

impl RawNode for RetiredBag {
    #[inline]
    unsafe fn next(node: *mut Self) -> *mut Self {
        (*node).next
    }

    #[inline]
    unsafe fn set_next(node: *mut Self, next: *mut Self) {
        (*node).next = next;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AbandonedBags
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Concurrent queue containing all retired bags abandoned by exited threads.
#[derive(Debug, Default)]
pub(crate) struct AbandonedBags {
    queue: RawQueue<RetiredBag>,
}

impl AbandonedBags {
    /// Creates a new (empty) queue.
    #[inline]
    pub(crate) const fn new() -> Self {
        Self { queue: RawQueue::new() }
    }

    /// Adds a new abandoned retired bag to the front of the queue.
    #[inline]
    pub(crate) fn push(&self, abandoned: Box<RetiredBag>) {
        let leaked = Box::into_raw(abandoned);
        unsafe { self.queue.push(leaked) };
    }

    /// Takes the entire content of the queue and merges the retired records
    /// of all abandoned bags into one.
    #[inline]
    pub(crate) fn take_and_merge(&self) -> Option<Box<RetiredBag>> {
        let head = self.queue.take_all();
        if head.is_null() {
            return None;
        }

        let mut boxed = unsafe { Box::from_raw(head) };
        let mut curr = boxed.next;
        boxed.next = core::ptr::null_mut();

        while !curr.is_null() {
            let RetiredBag { inner: bag, next } = *unsafe { Box::from_raw(curr) };
            boxed.merge(bag);
            curr = next;
        }

        Some(boxed)
    }
}

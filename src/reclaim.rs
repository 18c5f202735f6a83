//! The public-facing reclamation API: a per-thread [`Guard`] used to protect
//! node references while traversing a set, and `retire` to hand a logically
//! removed node over to the reclamation scheme.
//!
//! Every thread that touches a set lazily initializes its own [`Local`]
//! the first time it acquires a `Guard`; the thread-local handle is looked up
//! through [`LocalAccess`] exactly the way the teacher's `DefaultAccess` did.

use core::ptr::NonNull;

use crate::sync::atomic::Ordering;
use crate::sync::thread_local;

use crate::hazard::Hazard;
use crate::local::{Local, LocalAccess, RecycleError};
use crate::marked::{AtomicMarkedPtr, MarkedPtr};
use crate::retired::Retired;

thread_local! {
    static LOCAL: Local = Local::new();
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Guard
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An RAII handle to a hazard pointer, reserved for the current thread.
///
/// A `Guard` starts out merely reserved (protecting nothing). Calling
/// [`protect`](Guard::protect) upgrades it to actively shield a specific
/// node's address from reclamation until the guard is next used to protect
/// something else, [`release`](Guard::release)d, or dropped.
#[derive(Debug)]
pub(crate) struct Guard {
    hazard: &'static Hazard,
}

impl Guard {
    /// Reserves a (currently unprotecting) hazard pointer for the current
    /// thread.
    #[inline]
    pub(crate) fn new() -> Self {
        Self { hazard: LOCAL.with(|local| local.get_hazard(None)) }
    }

    /// Loads `src`, protects whatever node address it currently points to,
    /// and returns the value observed to still be current after protecting
    /// it.
    ///
    /// This is the `protect` operation of spec §4.2: a plain load is not
    /// enough, since the referenced node could be retired and reclaimed
    /// between the load and its use. The loop below keeps re-protecting the
    /// most recently observed address until a load confirms nothing changed
    /// in between, at which point the address is guaranteed to remain valid
    /// for as long as this guard keeps protecting it.
    #[inline]
    pub(crate) fn protect<T>(&mut self, src: &AtomicMarkedPtr<T>, order: Ordering) -> MarkedPtr<T> {
        let mut ptr = src.load(order);
        loop {
            let raw = ptr.raw();
            let addr = match NonNull::new(raw) {
                Some(addr) => addr,
                None => {
                    self.release();
                    return ptr;
                }
            };

            let hazard = LOCAL.with(|local| local.get_hazard(Some(addr.cast())));
            Self::recycle_or_free(self.hazard);
            self.hazard = hazard;

            let reloaded = src.load(order);
            if reloaded.raw() == raw {
                return reloaded;
            }

            ptr = reloaded;
        }
    }

    /// Releases the protected address, if any, reverting the guard back to
    /// merely reserved.
    #[inline]
    pub(crate) fn release(&mut self) {
        #[cfg(feature = "count-release")]
        LOCAL.with(LocalAccess::increase_ops_count);

        let hazard = LOCAL.with(|local| local.get_hazard(None));
        Self::recycle_or_free(self.hazard);
        self.hazard = hazard;
    }

    #[inline]
    fn recycle_or_free(hazard: &'static Hazard) {
        let recycled = LOCAL.try_with(|local| local.try_recycle_hazard(hazard)).unwrap_or(Err(RecycleError::Access));
        if recycled.is_err() {
            hazard.set_free(Ordering::Relaxed);
        }
    }
}

impl Default for Guard {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Guard {
    #[inline]
    fn drop(&mut self) {
        Self::recycle_or_free(self.hazard);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// retire
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Hands a logically removed, no-longer-reachable node over to the
/// reclamation scheme.
///
/// # Safety
///
/// `ptr` must not be reachable from any set any more (its removal must have
/// already been linearized, spec §4.3/§4.4) and must not be retired more than
/// once.
#[inline]
pub(crate) unsafe fn retire<T: 'static>(ptr: NonNull<T>) {
    let retired = Retired::new_unchecked(ptr);
    LOCAL.with(|local| local.retire_record(retired));
}

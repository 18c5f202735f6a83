//! Indirection over `std::sync`/`core::sync` vs. `loom`'s shadow
//! implementations of the same types.
//!
//! Every atomic type and `thread_local!` used anywhere in this crate goes
//! through this module instead of `core`/`std` directly, so that the whole
//! crate can be re-checked under `loom`'s model checker by building with
//! `--cfg loom` (see `tests/loom_list.rs`). This is the same indirection
//! `other_examples/manifests/l1h3r-ptab` and
//! `other_examples/manifests/Johnabell-atom_box` use for their own
//! hazard-pointer/lock-free structures; normal builds never see `loom` at
//! all.
//!
//! `thread_local!` itself is only ever reachable through the `std` feature
//! (see `src/reclaim.rs`, `src/list.rs`, `src/skiplist.rs`, all of which are
//! gated the same way): there is no stable `no_std` thread-local storage, so
//! under `--no-default-features` this module exports only the atomics, and
//! the reclamation-backed ordered-set back-ends are compiled out entirely
//! rather than advertising a capability the crate cannot actually provide.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic;
        pub(crate) use loom::thread_local;
    } else {
        pub(crate) use core::sync::atomic;
        #[cfg(feature = "std")]
        pub(crate) use std::thread_local;
    }
}

// Thread-local scratch state (hazard/retired-record caches) keeps using
// `core::cell::UnsafeCell` even under `loom`: the loom model-checked tests
// exercise only the atomic CAS interleavings of the two ordered-set
// back-ends and the hazard list, not the single-threaded-per-owner local
// cache, so tracking it through `loom::cell::UnsafeCell` would add cost
// without adding coverage.
pub(crate) use core::cell::UnsafeCell;

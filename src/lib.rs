//! Two lock-free implementations of the ordered-set abstract data type: a
//! Harris-style singly-linked list ([`LinkedListSet`]) and a multi-level
//! probabilistic skip list ([`SkipListSet`]). Both satisfy the same
//! [`OrderedSet`] contract and reclaim unlinked nodes through an internal
//! hazard-pointer scheme, so any number of mutator and reader threads may
//! call `insert`/`remove`/`contains`/`size` concurrently without taking a
//! lock on the common paths.
//!
//! ```
//! use lockfree_order::{LinkedListSet, OrderedSet};
//!
//! let set = LinkedListSet::new();
//! assert!(set.insert(5));
//! assert!(set.contains(&5));
//! assert!(!set.insert(5));
//! assert!(set.remove(&5));
//! assert_eq!(set.size(), 0);
//! ```
//!
//! `size` is intentionally **not** linearizable (spec §5): it reports the
//! count observed during its own traversal and is intended for diagnostics,
//! not for coordinating with concurrent mutators.
//!
//! The reclamation scheme's tunables (initial per-thread cache size, minimum
//! retired-record count before a scan, scan threshold) are process-wide and
//! configured once, before any worker thread touches a set, through
//! [`Config`] and [`Config::install`] -- there is no environment variable or
//! config file in this crate's surface.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

mod config;
mod global;
mod hazard;
#[cfg(feature = "std")]
mod list;
mod local;
mod marked;
mod queue;
#[cfg(feature = "std")]
mod reclaim;
mod retired;
mod set;
#[cfg(feature = "std")]
mod skiplist;
mod sync;

pub use crate::config::{Config, ConfigBuilder};
#[cfg(feature = "std")]
pub use crate::list::LinkedListSet;
pub use crate::set::{OrderedSet, Validate};
#[cfg(feature = "std")]
pub use crate::skiplist::SkipListSet;

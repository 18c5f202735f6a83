//! The uniform external contract both ordered-set back-ends implement (spec
//! §6), plus a diagnostic extension used by the test suite and the
//! demonstration binary to check the testable properties of spec §8.

#[cfg(feature = "std")]
use crate::list::LinkedListSet;
#[cfg(feature = "std")]
use crate::skiplist::SkipListSet;

/// The common contract of a concurrent ordered set over `T` (spec §6).
///
/// Both back-ends satisfy it without holding any lock on the common paths;
/// `size` is explicitly not linearizable (spec §5).
pub trait OrderedSet<T> {
    /// Inserts `value`, returning `true` if it was not already present.
    fn insert(&self, value: T) -> bool;

    /// Removes `value`, returning `true` if it was present.
    fn remove(&self, value: &T) -> bool;

    /// Returns `true` if `value` is a current member of the set.
    fn contains(&self, value: &T) -> bool;

    /// Returns the approximate number of live elements.
    fn size(&self) -> usize;
}

/// A non-linearizable diagnostic for single-threaded use once all mutators
/// have quiesced (spec §8 properties 2-5).
pub trait Validate {
    /// `true` iff the structure is a strictly increasing chain bounded by
    /// sentinels, with no duplicate values, no marked residue, and (for
    /// towered structures) consistent tower reachability across levels.
    fn validate(&self) -> bool;
}

#[cfg(feature = "std")]
impl<T> OrderedSet<T> for LinkedListSet<T>
where
    T: Ord + 'static,
{
    #[inline]
    fn insert(&self, value: T) -> bool {
        LinkedListSet::insert(self, value)
    }

    #[inline]
    fn remove(&self, value: &T) -> bool {
        LinkedListSet::remove(self, value)
    }

    #[inline]
    fn contains(&self, value: &T) -> bool {
        LinkedListSet::contains(self, value)
    }

    #[inline]
    fn size(&self) -> usize {
        LinkedListSet::size(self)
    }
}

#[cfg(feature = "std")]
impl<T> Validate for LinkedListSet<T>
where
    T: Ord + 'static,
{
    #[inline]
    fn validate(&self) -> bool {
        LinkedListSet::validate(self)
    }
}

#[cfg(feature = "std")]
impl<T> OrderedSet<T> for SkipListSet<T>
where
    T: Ord + 'static,
{
    #[inline]
    fn insert(&self, value: T) -> bool {
        SkipListSet::insert(self, value)
    }

    #[inline]
    fn remove(&self, value: &T) -> bool {
        SkipListSet::remove(self, value)
    }

    #[inline]
    fn contains(&self, value: &T) -> bool {
        SkipListSet::contains(self, value)
    }

    #[inline]
    fn size(&self) -> usize {
        SkipListSet::size(self)
    }
}

#[cfg(feature = "std")]
impl<T> Validate for SkipListSet<T>
where
    T: Ord + 'static,
{
    #[inline]
    fn validate(&self) -> bool {
        SkipListSet::validate(self)
    }
}

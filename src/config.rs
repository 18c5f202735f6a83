//! Types for global one-time configuration of the runtime parameters used by
//! the reclamation scheme.
//!
//! There is no environment variable or config file in this crate's surface
//! (spec §6 "Driver boundary", §7): the only way to change the reclamation
//! scheme's tunables is to build a [`Config`] and [`install`](Config::install)
//! it before spawning any worker thread.

use crate::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_INIT_CACHE: usize = 128;
const DEFAULT_MIN_REQUIRED_RECORDS: u32 = 0;

#[cfg(all(not(feature = "maximum-reclamation-freq"), not(feature = "reduced-reclamation-freq")))]
const DEFAULT_SCAN_THRESHOLD: u32 = 100;
#[cfg(feature = "reduced-reclamation-freq")]
const DEFAULT_SCAN_THRESHOLD: u32 = 200;
#[cfg(feature = "maximum-reclamation-freq")]
const DEFAULT_SCAN_THRESHOLD: u32 = 1;

// Process-wide, installed once via `Config::install` before any worker
// thread is spawned (spec §6/§7: constructor-time API only, never env vars).
// `AtomicUsize` rather than `AtomicU32`/`AtomicBool` throughout: `loom`'s
// shadow `core::sync::atomic` only models a subset of the real types, and
// `usize` is always in it.
static SCAN_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_SCAN_THRESHOLD as usize);
static MIN_REQUIRED_RECORDS: AtomicUsize = AtomicUsize::new(DEFAULT_MIN_REQUIRED_RECORDS as usize);
static INIT_CACHE: AtomicUsize = AtomicUsize::new(DEFAULT_INIT_CACHE);

////////////////////////////////////////////////////////////////////////////////////////////////////
// Config
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runtime configuration parameters.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    init_cache: usize,
    min_required_records: u32,
    scan_threshold: u32,
}

/********** impl Default **************************************************************************/

impl Default for Config {
    #[inline]
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/********** impl inherent *************************************************************************/

impl Config {
    /// Creates a new [`Config`] with the given parameters
    ///
    /// # Panics
    ///
    /// This function panics, if `scan_threshold` is 0.
    #[inline]
    pub fn with_params(init_cache: usize, min_required_records: u32, scan_threshold: u32) -> Self {
        assert!(scan_threshold > 0, "scan threshold must be greater than 0");
        Self { init_cache, min_required_records, scan_threshold }
    }

    /// Returns the initial cache size for newly spawned threads.
    #[inline]
    pub fn init_cache(&self) -> usize {
        self.init_cache
    }

    /// Returns the minimum amount of retired records that is required, before
    /// an attempt at reclaiming records is initiated.
    #[inline]
    pub fn min_required_records(&self) -> u32 {
        self.min_required_records
    }

    /// Returns the scan threshold.
    ///
    /// Every retired record or dropped hazard `Guard` (depending on which
    /// feature is selected) counts towards this threshold.
    /// Once it is reached, an attempt is made to reclaim records.
    #[inline]
    pub fn scan_threshold(&self) -> u32 {
        self.scan_threshold
    }

    /// Installs `self` as the process-wide configuration for the reclamation
    /// scheme.
    ///
    /// Only threads spawned *after* this call observe the new parameters: a
    /// thread that already lazily initialized its [`Local`](crate::local::Local)
    /// keeps whatever was live at that point. Call this once, before spawning
    /// any worker thread, the same way the original reference implementation
    /// reads its tunables once at start-up.
    #[inline]
    pub fn install(self) {
        SCAN_THRESHOLD.store(self.scan_threshold as usize, Ordering::Relaxed);
        MIN_REQUIRED_RECORDS.store(self.min_required_records as usize, Ordering::Relaxed);
        INIT_CACHE.store(self.init_cache, Ordering::Relaxed);
    }
}

/// The scan threshold currently in effect (default, or set by the most recent
/// [`Config::install`]).
#[inline]
pub(crate) fn scan_threshold() -> u32 {
    SCAN_THRESHOLD.load(Ordering::Relaxed) as u32
}

/// The minimum retired-record count currently in effect.
#[inline]
pub(crate) fn min_required_records() -> u32 {
    MIN_REQUIRED_RECORDS.load(Ordering::Relaxed) as u32
}

/// The initial retired-record cache capacity currently in effect.
#[inline]
pub(crate) fn init_cache() -> usize {
    INIT_CACHE.load(Ordering::Relaxed)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigBuilder
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A builder type for gradually initializing a [`Config`].
///
/// This is mainly useful for keeping stability, in case the internal structure
/// of the [`Config`] type changes in the future, e.g. because further
/// parameters are added.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConfigBuilder {
    init_cache: Option<usize>,
    min_required_records: Option<u32>,
    scan_threshold: Option<u32>,
}

impl ConfigBuilder {
    /// Creates a new [`ConfigBuilder`] with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial size of the cache for retired records of each newly
    /// created thread.
    ///
    /// If this is set to e.g. 0, retiring the first record will require the
    /// allocation of memory by the internally used data structure.
    #[inline]
    pub fn init_cache(mut self, init_cache: usize) -> Self {
        self.init_cache = Some(init_cache);
        self
    }

    /// Sets the minimum amount of records that must have been retired by a
    /// thread, before the thread may attempt to reclaim any memory.
    #[inline]
    pub fn min_required_records(mut self, min_required_records: u32) -> Self {
        self.min_required_records = Some(min_required_records);
        self
    }

    /// Sets the scan threshold.
    #[inline]
    pub fn scan_threshold(mut self, scan_threshold: u32) -> Self {
        self.scan_threshold = Some(scan_threshold);
        self
    }

    /// Consumes the [`ConfigBuilder`] and returns a initialized [`Config`].
    ///
    /// Unspecified parameters are initialized with their default values.
    #[inline]
    pub fn build(self) -> Config {
        Config::with_params(
            self.init_cache.unwrap_or(DEFAULT_INIT_CACHE),
            self.min_required_records.unwrap_or(DEFAULT_MIN_REQUIRED_RECORDS),
            self.scan_threshold.unwrap_or(DEFAULT_SCAN_THRESHOLD),
        )
    }
}

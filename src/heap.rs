//! `Heap`: the composition root.
//!
//! Library code never reaches for a hidden global: allocators and collectors
//! are passed explicitly. A `Heap` bundles one allocator with a default
//! collector so applications have a single place to create handles from.
//! [`Heap::global`] offers a process-wide instance for callers who want one.

use crate::alloc::{AllocError, AllocatorConfig, TrackedAllocator};
use crate::ownership::{Collector, ErasedDestroy, SharedHandle};
use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

/// Name of the collector every `Heap` starts with.
pub const DEFAULT_COLLECTOR: &str = "default";

/// One tracked allocator plus a default collector.
#[derive(Debug, Clone)]
pub struct Heap {
    allocator: Arc<TrackedAllocator>,
    collector: Arc<Collector>,
}

impl Heap {
    /// Creates a heap with default settings.
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default())
    }

    /// Creates a heap over a freshly configured allocator.
    pub fn with_config(config: AllocatorConfig) -> Self {
        let journal_capacity = config.journal_capacity;
        Self::from_parts(
            Arc::new(TrackedAllocator::with_config(config)),
            Arc::new(Collector::with_journal_capacity(DEFAULT_COLLECTOR, journal_capacity)),
        )
    }

    /// Assembles a heap from existing parts.
    pub fn from_parts(allocator: Arc<TrackedAllocator>, collector: Arc<Collector>) -> Self {
        Self { allocator, collector }
    }

    /// The process-wide heap, created with default settings on first use.
    pub fn global() -> &'static Heap {
        static GLOBAL: OnceLock<Heap> = OnceLock::new();
        GLOBAL.get_or_init(Heap::new)
    }

    /// The allocator.
    pub fn allocator(&self) -> &Arc<TrackedAllocator> {
        &self.allocator
    }

    /// The default collector.
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Creates an independent collector over this heap's allocator.
    pub fn new_collector(&self, name: impl Into<Cow<'static, str>>) -> Arc<Collector> {
        Arc::new(Collector::with_journal_capacity(
            name,
            self.allocator.config().journal_capacity,
        ))
    }

    /// Constructs `value` and returns a handle counted by the default collector.
    ///
    /// # Errors
    /// Propagates allocation failure.
    #[track_caller]
    pub fn share<T>(&self, value: T) -> Result<SharedHandle<T>, AllocError> {
        SharedHandle::new(value, &self.allocator, &self.collector)
    }

    /// Constructs `value` and returns a handle counted by `collector`.
    ///
    /// # Errors
    /// Propagates allocation failure.
    #[track_caller]
    pub fn share_in<T>(&self, value: T, collector: &Arc<Collector>) -> Result<SharedHandle<T>, AllocError> {
        SharedHandle::new(value, &self.allocator, collector)
    }

    /// Constructs an `n`-element array cloned from `prototype` and returns a
    /// handle to it. `n == 0` yields a null handle without allocating.
    ///
    /// # Errors
    /// Propagates allocation failure.
    #[track_caller]
    pub fn share_array<T: Clone>(&self, n: usize, prototype: T) -> Result<SharedHandle<T>, AllocError> {
        SharedHandle::new_array(n, prototype, &self.allocator, &self.collector)
    }

    /// Constructs a `C` and returns a handle viewing it as `T` (usually a
    /// trait object), destroyed as a `C`.
    ///
    /// # Errors
    /// Propagates allocation failure, or [`AllocError::ViewMismatch`] if
    /// `coerce` moves the address.
    #[track_caller]
    pub fn share_erased<T: ?Sized, C>(
        &self,
        value: C,
        coerce: impl FnOnce(*mut C) -> *mut T,
    ) -> Result<SharedHandle<T, ErasedDestroy>, AllocError> {
        SharedHandle::new_erased(value, coerce, &self.allocator, &self.collector)
    }

    /// A null handle on the default collector.
    pub fn null<T>(&self) -> SharedHandle<T> {
        SharedHandle::null(Arc::clone(&self.allocator), Arc::clone(&self.collector))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

//! `SharedHandle`: a copyable owner whose count lives in a [`Collector`].
//!
//! Unlike `Arc`, the count is not stored next to the value. Any number of
//! handles, created independently from the same raw pointer, share ownership
//! as long as they use the same collector. The handle whose release takes the
//! count to zero runs the destroy strategy; every other release only
//! decrements.
//!
//! # State
//!
//! A handle is either *null* (no address, nothing registered) or *bound*
//! (its address holds at least one claim in the collector). Accessors are
//! fallible: a null handle yields `None` instead of a dangling dereference.

use super::collector::Collector;
use super::strategy::{DestroyStrategy, ErasedDestroy, TypedDestroy};
use crate::alloc::{stride_of, AllocError, TrackedAllocator};
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::slice;
use std::sync::Arc;

/// A reference-counted handle to a tracked allocation.
pub struct SharedHandle<T: ?Sized, D: DestroyStrategy<T> = TypedDestroy> {
    ptr: Option<NonNull<T>>,
    allocator: Arc<TrackedAllocator>,
    collector: Arc<Collector>,
    strategy: D,
    _owns: PhantomData<T>,
}

// SAFETY: like `Arc<T>`, any thread holding a handle may read the pointee
// (needs `Sync`) and may be the one to destroy it (needs `Send`). The collector
// and allocator are themselves thread-safe.
unsafe impl<T: ?Sized + Send + Sync, D: DestroyStrategy<T> + Send> Send for SharedHandle<T, D> {}
unsafe impl<T: ?Sized + Send + Sync, D: DestroyStrategy<T> + Sync> Sync for SharedHandle<T, D> {}

impl<T> SharedHandle<T> {
    /// Constructs `value` in `allocator` and returns the first handle to it.
    ///
    /// # Errors
    /// Propagates allocation failure.
    #[track_caller]
    pub fn new(
        value: T,
        allocator: &Arc<TrackedAllocator>,
        collector: &Arc<Collector>,
    ) -> Result<Self, AllocError> {
        let ptr = allocator.construct_one(value)?;
        // SAFETY: freshly constructed `T` from this allocator.
        Ok(unsafe { Self::from_raw(ptr.as_ptr(), Arc::clone(allocator), Arc::clone(collector)) })
    }

    /// Constructs an `n`-element array, each element cloned from `prototype`,
    /// and returns a handle to element 0. The whole array is destroyed with
    /// the last handle; [`as_slice`](Self::as_slice) exposes every element.
    ///
    /// With `n == 0` nothing is allocated: `prototype` is dropped and the
    /// handle is null.
    ///
    /// # Errors
    /// Propagates allocation failure.
    #[track_caller]
    pub fn new_array(
        n: usize,
        prototype: T,
        allocator: &Arc<TrackedAllocator>,
        collector: &Arc<Collector>,
    ) -> Result<Self, AllocError>
    where
        T: Clone,
    {
        if n == 0 {
            drop(prototype);
            return Ok(Self::null(Arc::clone(allocator), Arc::clone(collector)));
        }
        let ptr = allocator.construct_array(n, prototype)?;
        // SAFETY: freshly constructed array of `T` from this allocator.
        Ok(unsafe { Self::from_raw(ptr.as_ptr(), Arc::clone(allocator), Arc::clone(collector)) })
    }

    /// Adopts a raw pointer, adding one claim on it in `collector`.
    ///
    /// Several handles may adopt the same pointer independently; they share
    /// ownership through the collector's count.
    ///
    /// # Safety
    /// A non-null `ptr` must come from `construct_one::<T>` or
    /// `construct_array::<T>` with at least one element on `allocator`, and
    /// every handle to it must use `collector`.
    pub unsafe fn from_raw(ptr: *mut T, allocator: Arc<TrackedAllocator>, collector: Arc<Collector>) -> Self {
        // SAFETY: forwarded contract.
        unsafe { Self::from_raw_with(ptr, allocator, collector, TypedDestroy) }
    }

    /// Replaces the pointee with a freshly constructed `value`, releasing the
    /// current one.
    ///
    /// # Errors
    /// Propagates allocation failure; the handle is unchanged in that case.
    #[track_caller]
    pub fn set(&mut self, value: T) -> Result<(), AllocError> {
        let ptr = self.allocator.construct_one(value)?;
        // SAFETY: freshly constructed `T` from the handle's own allocator.
        unsafe { self.reset(ptr.as_ptr()) };
        Ok(())
    }
}

impl<T: ?Sized> SharedHandle<T, ErasedDestroy> {
    /// Constructs a concrete `C` and views it as `T`, typically a trait object.
    ///
    /// `coerce` performs the unsizing cast, for example
    /// `|p| p as *mut dyn Shape`. The pointee is destroyed as a `C`.
    ///
    /// # Errors
    /// Propagates allocation failure. Returns [`AllocError::ViewMismatch`] if
    /// `coerce` returns a pointer to a different address; the value is
    /// destroyed first.
    #[track_caller]
    pub fn new_erased<C>(
        value: C,
        coerce: impl FnOnce(*mut C) -> *mut T,
        allocator: &Arc<TrackedAllocator>,
        collector: &Arc<Collector>,
    ) -> Result<Self, AllocError> {
        let concrete = allocator.construct_one(value)?;
        let view = coerce(concrete.as_ptr());
        if view.cast::<u8>() != concrete.as_ptr().cast::<u8>() {
            // SAFETY: nothing else has seen the freshly constructed value.
            unsafe { allocator.destroy(concrete.as_ptr()) };
            return Err(AllocError::ViewMismatch {
                address: concrete.as_ptr() as usize,
                view: view.cast::<u8>() as usize,
            });
        }
        // SAFETY: the view addresses a constructed `C`, destroyed as a `C`.
        Ok(unsafe {
            Self::from_raw_with(
                view,
                Arc::clone(allocator),
                Arc::clone(collector),
                ErasedDestroy::of::<C>(),
            )
        })
    }
}

impl<T: ?Sized, D: DestroyStrategy<T>> SharedHandle<T, D> {
    /// Adopts a raw pointer with an explicit destroy strategy.
    ///
    /// # Safety
    /// `strategy` must be able to destroy `ptr` through `allocator`, and every
    /// handle to `ptr` must use `collector` and an equivalent strategy.
    pub unsafe fn from_raw_with(
        ptr: *mut T,
        allocator: Arc<TrackedAllocator>,
        collector: Arc<Collector>,
        strategy: D,
    ) -> Self {
        let ptr = NonNull::new(ptr);
        if let Some(ptr) = ptr {
            collector.push(ptr.as_ptr().cast_const());
        }
        Self {
            ptr,
            allocator,
            collector,
            strategy,
            _owns: PhantomData,
        }
    }

    /// A handle that owns nothing yet.
    pub fn null_with(allocator: Arc<TrackedAllocator>, collector: Arc<Collector>, strategy: D) -> Self {
        Self {
            ptr: None,
            allocator,
            collector,
            strategy,
            _owns: PhantomData,
        }
    }

    /// A handle that owns nothing yet, with the default strategy.
    pub fn null(allocator: Arc<TrackedAllocator>, collector: Arc<Collector>) -> Self
    where
        D: Default,
    {
        Self::null_with(allocator, collector, D::default())
    }

    /// Returns `true` if the handle owns nothing.
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The owned address, if any.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Borrows the pointee, or `None` for a null handle.
    pub fn get(&self) -> Option<&T> {
        // SAFETY: our claim keeps the pointee alive for as long as `self` is borrowed.
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Mutably borrows the pointee if this handle holds the only claim.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let ptr = self.ptr?;
        if self.use_count() != 1 {
            return None;
        }
        // SAFETY: sole claim, and `&mut self` rules out clones in flight.
        Some(unsafe { &mut *ptr.as_ptr() })
    }

    /// Claims currently held on this handle's address, or 0 for a null handle.
    pub fn use_count(&self) -> usize {
        self.ptr
            .map_or(0, |ptr| self.collector.utility_of(ptr.as_ptr().cast_const()))
    }

    /// Returns `true` if both handles own the same address (or are both null).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.thin() == other.thin()
    }

    /// The collector counting this handle's claims.
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// The allocator the pointee lives in.
    pub fn allocator(&self) -> &Arc<TrackedAllocator> {
        &self.allocator
    }

    /// The destroy strategy.
    pub fn strategy(&self) -> &D {
        &self.strategy
    }

    /// Drops this handle's claim and becomes null. Returns `true` if this
    /// release destroyed the pointee.
    pub fn release(&mut self) -> bool {
        let Some(ptr) = self.ptr.take() else {
            return false;
        };
        // Decrement and zero test are one step; only one releaser can win.
        // SAFETY: `ptr` carried this handle's own claim, taken out of `self.ptr` above.
        if !unsafe { self.collector.release(ptr.as_ptr().cast_const()) }.is_last() {
            return false;
        }
        tracing::debug!(
            collector = self.collector.name(),
            address = format_args!("{:p}", ptr.as_ptr().cast::<()>()),
            "last claim released, destroying"
        );
        // SAFETY: this release observed the zero transition, so no other handle
        // refers to `ptr` and the strategy runs exactly once.
        unsafe { self.strategy.destroy(ptr, &self.allocator) };
        true
    }

    /// Rebinds to `ptr`, releasing the current address. Rebinding to the
    /// current address leaves the count unchanged.
    ///
    /// # Safety
    /// As for [`from_raw_with`](Self::from_raw_with) with this handle's
    /// allocator, collector and strategy.
    pub unsafe fn reset(&mut self, ptr: *mut T) {
        let next = NonNull::new(ptr);
        if let Some(next) = next {
            self.collector.push(next.as_ptr().cast_const());
        }
        self.release();
        self.ptr = next;
    }

    /// Moves the claim into a new handle, leaving this one null. The count is
    /// unchanged.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            ptr: self.ptr.take(),
            allocator: Arc::clone(&self.allocator),
            collector: Arc::clone(&self.collector),
            strategy: self.strategy.clone(),
            _owns: PhantomData,
        }
    }

    fn thin(&self) -> Option<NonNull<()>> {
        self.ptr.map(NonNull::cast)
    }
}

impl<T, D: DestroyStrategy<T>> SharedHandle<T, D> {
    /// Every element behind the handle: the whole array for array blocks, a
    /// one-element slice otherwise. `None` for a null handle or an address the
    /// allocator no longer tracks.
    pub fn as_slice(&self) -> Option<&[T]> {
        let ptr = self.ptr?;
        let block = self.allocator.block_for(ptr.as_ptr().cast_const())?;
        let len = if block.is_array() {
            block.size() / stride_of::<T>()
        } else {
            1
        };
        // SAFETY: `len` initialised elements start at `ptr`; our claim keeps them alive.
        Some(unsafe { slice::from_raw_parts(ptr.as_ptr(), len) })
    }
}

impl<T: ?Sized, D: DestroyStrategy<T>> Clone for SharedHandle<T, D> {
    fn clone(&self) -> Self {
        if let Some(ptr) = self.ptr {
            self.collector.push(ptr.as_ptr().cast_const());
        }
        Self {
            ptr: self.ptr,
            allocator: Arc::clone(&self.allocator),
            collector: Arc::clone(&self.collector),
            strategy: self.strategy.clone(),
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized, D: DestroyStrategy<T>> Drop for SharedHandle<T, D> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ?Sized, D: DestroyStrategy<T>> PartialEq for SharedHandle<T, D> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized, D: DestroyStrategy<T>> Eq for SharedHandle<T, D> {}

impl<T: ?Sized, D: DestroyStrategy<T>> fmt::Debug for SharedHandle<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("ptr", &self.thin())
            .field("use_count", &self.use_count())
            .field("collector", &self.collector.name())
            .finish()
    }
}

impl<T: ?Sized, D: DestroyStrategy<T>> fmt::Pointer for SharedHandle<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = self.thin().map_or(core::ptr::null(), |p| p.as_ptr().cast_const());
        fmt::Pointer::fmt(&ptr, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::strategy::FnDestroy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn parts() -> (Arc<TrackedAllocator>, Arc<Collector>) {
        (Arc::new(TrackedAllocator::new()), Arc::new(Collector::new("handle-tests")))
    }

    #[test]
    fn null_handle_is_inert() {
        let (alloc, collector) = parts();
        let mut handle: SharedHandle<u32> = SharedHandle::null(alloc, Arc::clone(&collector));
        assert!(handle.is_null());
        assert!(handle.get().is_none());
        assert_eq!(handle.use_count(), 0);
        assert!(!handle.release());
        let copy = handle.clone();
        assert!(copy.is_null());
        assert!(collector.is_empty());
        assert!(collector.journal().is_clean());
    }

    #[test]
    fn reset_to_same_address_keeps_the_pointee() {
        let (alloc, collector) = parts();
        let mut handle = SharedHandle::new(5u64, &alloc, &collector).unwrap();
        let raw = handle.as_ptr().unwrap().as_ptr();
        unsafe { handle.reset(raw) };
        assert_eq!(handle.get(), Some(&5));
        assert_eq!(handle.use_count(), 1);
        drop(handle);
        assert!(alloc.ledger().is_empty());
    }

    #[test]
    fn set_releases_the_previous_value() {
        let (alloc, collector) = parts();
        let mut handle = SharedHandle::new(String::from("old"), &alloc, &collector).unwrap();
        handle.set(String::from("new")).unwrap();
        assert_eq!(handle.get().map(String::as_str), Some("new"));
        assert_eq!(alloc.ledger().len(), 1);
        assert_eq!(collector.count(), 1);
    }

    #[test]
    fn take_moves_the_claim() {
        let (alloc, collector) = parts();
        let mut first = SharedHandle::new(1u8, &alloc, &collector).unwrap();
        let second = first.take();
        assert!(first.is_null());
        assert_eq!(second.use_count(), 1);
        drop(first);
        assert_eq!(alloc.ledger().len(), 1);
        drop(second);
        assert!(alloc.ledger().is_empty());
    }

    #[test]
    fn get_mut_requires_the_only_claim() {
        let (alloc, collector) = parts();
        let mut handle = SharedHandle::new(vec![1, 2], &alloc, &collector).unwrap();
        handle.get_mut().unwrap().push(3);
        let other = handle.clone();
        assert!(handle.get_mut().is_none());
        drop(other);
        assert_eq!(handle.get_mut().map(|v| v.len()), Some(3));
    }

    #[test]
    fn fn_strategy_runs_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let (alloc, collector) = parts();
        let raw = alloc.construct_one(11u16).unwrap();
        let strategy = FnDestroy(|ptr: NonNull<u16>, alloc: &TrackedAllocator| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            unsafe { alloc.destroy(ptr.as_ptr()) };
        });
        let handle = unsafe { SharedHandle::from_raw_with(raw.as_ptr(), Arc::clone(&alloc), collector, strategy) };
        let copies: Vec<_> = (0..4).map(|_| handle.clone()).collect();
        drop(handle);
        drop(copies);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(alloc.ledger().is_empty());
    }

    #[test]
    fn array_handle_exposes_every_element() {
        let (alloc, collector) = parts();
        let handle = SharedHandle::new_array(4, 9i32, &alloc, &collector).unwrap();
        assert_eq!(handle.as_slice(), Some(&[9, 9, 9, 9][..]));
        assert_eq!(handle.get(), Some(&9));
    }

    #[test]
    fn empty_array_handle_is_null() {
        let (alloc, collector) = parts();
        let handle = SharedHandle::new_array(0, 0xABCD_u64, &alloc, &collector).unwrap();
        assert!(handle.is_null());
        assert!(handle.get().is_none());
        assert!(handle.as_slice().is_none());
        assert!(alloc.ledger().is_empty());
        assert!(collector.is_empty());
    }

    #[test]
    fn coercion_that_moves_the_address_is_an_error() {
        let (alloc, collector) = parts();
        let result = SharedHandle::<u8, ErasedDestroy>::new_erased(
            7u16,
            |p| p.cast::<u8>().wrapping_add(1),
            &alloc,
            &collector,
        );
        let Err(AllocError::ViewMismatch { address, view }) = result else {
            panic!("expected a view mismatch");
        };
        assert_eq!(view, address + 1);
        assert!(alloc.ledger().is_empty());
        assert!(collector.is_empty());
    }
}

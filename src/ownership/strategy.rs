//! What a [`SharedHandle`](super::SharedHandle) does at the zero transition.
//!
//! Bookkeeping (push on clone, release on drop) is fixed in the handle; the
//! strategy only decides how the pointee is torn down once the last claim is
//! gone. It is a type parameter chosen at construction, so the common case
//! compiles down to a direct call.

use crate::alloc::TrackedAllocator;
use core::fmt;
use core::ptr::NonNull;

/// Tears down a pointee after its last handle let go.
pub trait DestroyStrategy<T: ?Sized>: Clone {
    /// Destroys what lives at `ptr`.
    ///
    /// # Safety
    /// Called at most once per registration cycle, by the handle whose release
    /// observed the zero transition. `ptr` was produced by `allocator` and no
    /// other handle still refers to it.
    unsafe fn destroy(&self, ptr: NonNull<T>, allocator: &TrackedAllocator);
}

/// Drops the pointee as `T` (array-aware via the ledger's block record) and frees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypedDestroy;

impl<T> DestroyStrategy<T> for TypedDestroy {
    unsafe fn destroy(&self, ptr: NonNull<T>, allocator: &TrackedAllocator) {
        // SAFETY: forwarded contract; the handle was built from a constructed `T`.
        unsafe { allocator.destroy(ptr.as_ptr()) };
    }
}

/// Frees the block without running any destructor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawDeallocate;

impl<T: ?Sized> DestroyStrategy<T> for RawDeallocate {
    unsafe fn destroy(&self, ptr: NonNull<T>, allocator: &TrackedAllocator) {
        // SAFETY: forwarded contract.
        unsafe { allocator.deallocate_raw(ptr.as_ptr()) };
    }
}

/// Destroys through the concrete type captured at construction, whatever the
/// handle's (possibly unsized) view type is.
///
/// This is how a `SharedHandle<dyn Trait>` tears down the concrete object
/// behind it.
#[derive(Clone, Copy)]
pub struct ErasedDestroy {
    destroy_fn: unsafe fn(*mut u8, &TrackedAllocator),
    type_name: &'static str,
}

impl ErasedDestroy {
    /// A strategy destroying the pointee as a `C`.
    pub fn of<C>() -> Self {
        unsafe fn destroy_as<C>(ptr: *mut u8, allocator: &TrackedAllocator) {
            // SAFETY: `ErasedDestroy::of::<C>` is only attached to handles over a constructed `C`.
            unsafe { allocator.destroy(ptr.cast::<C>()) };
        }
        Self {
            destroy_fn: destroy_as::<C>,
            type_name: core::any::type_name::<C>(),
        }
    }

    /// The concrete type this strategy destroys.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ErasedDestroy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErasedDestroy").field(&self.type_name).finish()
    }
}

impl<T: ?Sized> DestroyStrategy<T> for ErasedDestroy {
    unsafe fn destroy(&self, ptr: NonNull<T>, allocator: &TrackedAllocator) {
        // SAFETY: forwarded contract; the captured type matches the allocation.
        unsafe { (self.destroy_fn)(ptr.as_ptr().cast::<u8>(), allocator) };
    }
}

/// Runs a caller-supplied closure at the zero transition.
///
/// The closure takes over the whole teardown, including releasing the block.
#[derive(Clone, Copy)]
pub struct FnDestroy<F>(pub F);

impl<F> fmt::Debug for FnDestroy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnDestroy(..)")
    }
}

impl<T, F> DestroyStrategy<T> for FnDestroy<F>
where
    T: ?Sized,
    F: Fn(NonNull<T>, &TrackedAllocator) + Clone,
{
    unsafe fn destroy(&self, ptr: NonNull<T>, allocator: &TrackedAllocator) {
        (self.0)(ptr, allocator);
    }
}

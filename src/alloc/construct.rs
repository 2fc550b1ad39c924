//! Typed construction and header-driven destruction.
//!
//! `construct_*` place values into tracked blocks; [`TrackedAllocator::destroy`]
//! later recovers the element count from the ledger's record of the block, so
//! the destroying side needs only the element type, not the length. The
//! in-memory header is only checked against that record.
//!
//! # Caller contract
//!
//! `destroy::<T>` must be called with the same `T` the block was constructed
//! with. The ledger stores bytes, not a type, so the element count is
//! `size / size_of::<T>()`; destroying through a differently sized type runs the
//! wrong number of destructors on reinterpreted memory. This cannot be detected
//! here.

use super::error::AllocError;
use super::header::{Block, BlockKind};
use super::site::Site;
use super::tracked::TrackedAllocator;
use core::mem;
use core::ptr::{self, NonNull};

/// Bytes between consecutive elements of a tracked array of `T`.
///
/// Zero-sized types get a one-byte stride so the element count survives in
/// the header's byte size.
pub const fn stride_of<T>() -> usize {
    let size = mem::size_of::<T>();
    if size == 0 {
        1
    } else {
        size
    }
}

impl TrackedAllocator {
    /// Moves `value` into a new single-object block.
    ///
    /// # Errors
    /// Propagates allocation failure; `value` is dropped in that case.
    #[track_caller]
    pub fn construct_one<T>(&self, value: T) -> Result<NonNull<T>, AllocError> {
        let site = Site::here();
        let block = self.allocate_block(mem::size_of::<T>(), mem::align_of::<T>(), BlockKind::Single, site)?;
        let ptr = block.payload().cast::<T>();
        // SAFETY: the payload is sized and aligned for one `T`.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Builds an `n`-element array block, every element cloned from `prototype`.
    ///
    /// Returns a pointer to element 0. The prototype itself fills the last slot.
    ///
    /// Elements cannot be initialised individually: each one comes from the
    /// same prototype. Whether per-element initialisation should be offered is
    /// an open product question; keep this signature until it is settled.
    ///
    /// # Errors
    /// Propagates allocation failure.
    #[track_caller]
    pub fn construct_array<T: Clone>(&self, n: usize, prototype: T) -> Result<NonNull<T>, AllocError> {
        let site = Site::here();
        let stride = stride_of::<T>();
        let size = stride.checked_mul(n).ok_or(AllocError::LayoutOverflow {
            size: usize::MAX,
            align: mem::align_of::<T>(),
        })?;
        let block = self.allocate_block(size, mem::align_of::<T>(), BlockKind::Array, site)?;
        let base = block.payload().cast::<T>();

        let Some(last) = n.checked_sub(1) else {
            return Ok(base);
        };
        let mut guard = PartialArray {
            allocator: self,
            block,
            base,
            initialized: 0,
            site,
        };
        while guard.initialized < last {
            // SAFETY: `initialized < n`, inside the block.
            unsafe { base.as_ptr().add(guard.initialized).write(prototype.clone()) };
            guard.initialized += 1;
        }
        // SAFETY: slot `last` is inside the block.
        unsafe { base.as_ptr().add(last).write(prototype) };
        mem::forget(guard);
        Ok(base)
    }

    /// Builds an `n`-element array of `T::default()` values.
    ///
    /// # Errors
    /// Propagates allocation failure.
    #[track_caller]
    pub fn construct_array_default<T: Clone + Default>(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        self.construct_array(n, T::default())
    }

    /// Drops what lives at `ptr` and releases its block.
    ///
    /// Array blocks drop elements from the last index down to 0. Null is a
    /// no-op; an address the ledger does not know is journaled and left alone.
    ///
    /// # Safety
    /// `ptr` must come from `construct_one::<T>` or `construct_array::<T>` on this
    /// allocator, with the same `T`, and must not be used afterwards.
    #[track_caller]
    pub unsafe fn destroy<T>(&self, ptr: *mut T) {
        let site = Site::here();
        let Some(block) = self.block_for(ptr.cast_const()) else {
            if !ptr.is_null() {
                self.ledger().report_unknown(ptr as usize, "destroy", site);
            }
            return;
        };
        self.verify_header(&block, "destroy", site);

        if block.is_array() {
            let count = block.size() / stride_of::<T>();
            for index in (0..count).rev() {
                // SAFETY: `index < count`, and every element was initialised.
                unsafe { ptr::drop_in_place(ptr.add(index)) };
            }
        } else {
            // SAFETY: a single initialised `T` lives here.
            unsafe { ptr::drop_in_place(ptr) };
        }
        tracing::trace!(address = format_args!("{:#x}", block.address()), %site, "destroyed");
        // SAFETY: the contents are dropped and the caller gives up the pointer.
        unsafe { self.deallocate(ptr.cast::<u8>(), site) };
    }

    /// Releases the block at `ptr` without running any destructor.
    ///
    /// This is the type-erased path: anything still needing `Drop` at `ptr`
    /// is leaked.
    ///
    /// # Safety
    /// As for [`deallocate`](Self::deallocate).
    #[track_caller]
    pub unsafe fn deallocate_raw<T: ?Sized>(&self, ptr: *mut T) {
        // SAFETY: forwarded contract.
        unsafe { self.deallocate(ptr.cast::<u8>(), Site::here()) };
    }
}

// Unwinds a half-built array if a `clone` panics.
struct PartialArray<'a, T> {
    allocator: &'a TrackedAllocator,
    block: Block,
    base: NonNull<T>,
    initialized: usize,
    site: Site,
}

impl<T> Drop for PartialArray<'_, T> {
    fn drop(&mut self) {
        for index in (0..self.initialized).rev() {
            // SAFETY: elements below `initialized` were written.
            unsafe { ptr::drop_in_place(self.base.as_ptr().add(index)) };
        }
        // SAFETY: the block is ours and nothing else has seen it.
        unsafe { self.allocator.deallocate(self.block.payload().as_ptr(), self.site) };
    }
}

//! `TrackedAllocator`: header-tagged allocation with ledger bookkeeping.
//!
//! Each request is padded with a [`BlockHeader`](super::BlockHeader), served by
//! the backing allocator, zero-filled and recorded in the allocator's
//! [`AllocationLedger`]. Callers only ever see payload addresses.

use super::backend::{default_backend, default_backend_name};
use super::config::{AllocatorConfig, OomPolicy};
use super::error::AllocError;
use super::header::{Block, BlockHeader, BlockKind, BlockLayout, DEFAULT_ALIGN};
use super::ledger::AllocationLedger;
use super::site::Site;
use crate::diagnostics::{Anomaly, AnomalyKind};
use core::alloc::{GlobalAlloc, Layout};
use core::fmt;
use core::ptr::{self, NonNull};
use std::alloc::handle_alloc_error;

/// An allocator that records every block it hands out.
pub struct TrackedAllocator {
    backend: Box<dyn GlobalAlloc + Send + Sync>,
    backend_name: &'static str,
    ledger: AllocationLedger,
    config: AllocatorConfig,
}

impl TrackedAllocator {
    /// Creates an allocator over the feature-selected backend with default settings.
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default())
    }

    /// Creates an allocator over the feature-selected backend.
    pub fn with_config(config: AllocatorConfig) -> Self {
        Self::with_backend(config, default_backend_name(), default_backend())
    }

    /// Creates an allocator over an explicit backend.
    pub fn with_backend<B>(config: AllocatorConfig, name: &'static str, backend: B) -> Self
    where
        B: GlobalAlloc + Send + Sync + 'static,
    {
        tracing::debug!(backend = name, oom_policy = ?config.oom_policy, "tracked allocator created");
        Self {
            backend: Box::new(backend),
            backend_name: name,
            ledger: AllocationLedger::new(config.record_operations, config.journal_capacity),
            config,
        }
    }

    /// The ledger recording this allocator's blocks.
    pub fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    /// The settings this allocator was built with.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Name of the backing allocator.
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Allocates `size` zeroed payload bytes for a single object.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if the backend fails and the OOM policy is
    /// `ReturnError`; [`AllocError::LayoutOverflow`] for impossible sizes.
    pub fn allocate(&self, size: usize, site: Site) -> Result<NonNull<u8>, AllocError> {
        self.allocate_block(size, DEFAULT_ALIGN, BlockKind::Single, site)
            .map(|block| block.payload())
    }

    /// Allocates `size` zeroed payload bytes flagged as an array.
    ///
    /// # Errors
    /// As for [`allocate`](Self::allocate).
    pub fn allocate_array(&self, size: usize, site: Site) -> Result<NonNull<u8>, AllocError> {
        self.allocate_block(size, DEFAULT_ALIGN, BlockKind::Array, site)
            .map(|block| block.payload())
    }

    /// Allocates a zeroed block with explicit alignment and kind.
    ///
    /// # Errors
    /// As for [`allocate`](Self::allocate).
    pub fn allocate_block(
        &self,
        size: usize,
        align: usize,
        kind: BlockKind,
        site: Site,
    ) -> Result<Block, AllocError> {
        let BlockLayout { layout, .. } = Block::layout_for(size, align)?;
        // SAFETY: the layout always includes the header, so it is never zero-sized.
        let base = unsafe { self.backend.alloc_zeroed(layout) };
        let Some(base) = NonNull::new(base) else {
            return Err(self.out_of_memory(layout, size, align));
        };
        // SAFETY: `base` is a fresh region of `layout`.
        let block = unsafe { Block::init(base, size, align, kind) };
        self.ledger.insert(&block, site);
        tracing::trace!(
            address = format_args!("{:#x}", block.address()),
            size,
            array = kind.is_array(),
            %site,
            "allocate"
        );
        Ok(block)
    }

    /// Resizes the block at `ptr`, preserving the first `min(old, new)` payload
    /// bytes and zero-filling any growth. A null `ptr` allocates a fresh block.
    ///
    /// The block may move; on success the old address is no longer valid. On
    /// failure the old block is untouched and still tracked.
    ///
    /// # Errors
    /// [`AllocError::UnknownBlock`] if `ptr` is not a live block (also
    /// journaled), otherwise as for [`allocate`](Self::allocate).
    ///
    /// # Safety
    /// No other thread may be using or releasing the block at `ptr`.
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize, site: Site) -> Result<NonNull<u8>, AllocError> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(new_size, site);
        };
        let address = ptr as usize;
        let Some(old) = self.ledger.begin_resize(address, site) else {
            return Err(AllocError::UnknownBlock { address });
        };
        // SAFETY: the ledger had a live entry for this payload.
        let old_block = unsafe { Block::from_parts(payload, old.size, old.align, old.kind) };
        self.verify_header(&old_block, "reallocate", site);

        let new_layout = match Block::layout_for(new_size, old.align) {
            Ok(BlockLayout { layout, .. }) => layout,
            Err(err) => {
                self.ledger.restore(old);
                return Err(err);
            }
        };
        // SAFETY: region and layout come from a live block; the new size is non-zero.
        let base = unsafe {
            self.backend
                .realloc(old_block.base().as_ptr(), old_block.layout(), new_layout.size())
        };
        let Some(base) = NonNull::new(base) else {
            self.ledger.restore(old);
            return Err(self.out_of_memory(new_layout, new_size, old.align));
        };
        // SAFETY: `base` is a live region of `new_layout`; the payload offset is unchanged.
        let block = unsafe { Block::init(base, new_size, old.align, old.kind) };
        if new_size > old.size {
            // SAFETY: the grown tail lies inside the new payload.
            unsafe { ptr::write_bytes(block.payload().as_ptr().add(old.size), 0, new_size - old.size) };
        }
        self.ledger.complete_resize(&old, &block, site);
        tracing::trace!(
            from = format_args!("{address:#x}"),
            to = format_args!("{:#x}", block.address()),
            old_size = old.size,
            new_size,
            %site,
            "reallocate"
        );
        Ok(block.payload())
    }

    /// Releases the block at `ptr` without running any destructor.
    ///
    /// Null is a no-op. An address with no ledger entry is journaled as
    /// [`AnomalyKind::UnknownBlock`] and left alone.
    ///
    /// # Safety
    /// If `ptr` is live, nothing may use it afterwards.
    pub unsafe fn deallocate(&self, ptr: *mut u8, site: Site) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        let Some(entry) = self.ledger.erase(ptr as usize, site) else {
            return;
        };
        // SAFETY: the ledger had a live entry for this payload.
        let block = unsafe { Block::from_parts(payload, entry.size, entry.align, entry.kind) };
        self.verify_header(&block, "deallocate", site);
        tracing::trace!(
            address = format_args!("{:#x}", entry.address),
            size = entry.size,
            array = entry.is_array(),
            %site,
            "deallocate"
        );
        // SAFETY: base and layout reproduce the original request.
        unsafe { self.backend.dealloc(block.base().as_ptr(), block.layout()) };
    }

    /// The live block whose payload starts at `ptr`, if any.
    pub fn block_for<T: ?Sized>(&self, ptr: *const T) -> Option<Block> {
        let payload = NonNull::new(ptr.cast::<u8>().cast_mut())?;
        let entry = self.ledger.block_for(ptr)?;
        // SAFETY: the ledger had a live entry for this payload.
        Some(unsafe { Block::from_parts(payload, entry.size, entry.align, entry.kind) })
    }

    /// Reads the header stored in front of `ptr`, if `ptr` is a live block.
    ///
    /// # Safety
    /// The block must not be released concurrently.
    pub unsafe fn header_of<T: ?Sized>(&self, ptr: *const T) -> Option<BlockHeader> {
        let block = self.block_for(ptr)?;
        // SAFETY: live per the ledger; the caller rules out concurrent release.
        Some(unsafe { Block::read_header(block.payload()) })
    }

    /// Compares the in-memory header with the ledger's view, journaling any
    /// disagreement. The ledger's view wins: a mismatched header is rewritten
    /// from it, so one corruption is journaled once.
    pub(crate) fn verify_header(&self, block: &Block, operation: &'static str, site: Site) -> bool {
        // SAFETY: callers pass blocks confirmed live by the ledger.
        let header = unsafe { Block::read_header(block.payload()) };
        if header.describes(block) {
            return true;
        }
        self.ledger
            .report(Anomaly::new(AnomalyKind::HeaderMismatch, block.address(), operation).at(site));
        // SAFETY: live per the ledger, as above.
        unsafe { block.write_header() };
        false
    }

    fn out_of_memory(&self, layout: Layout, size: usize, align: usize) -> AllocError {
        tracing::warn!(size, align, backend = self.backend_name, "backing allocator failed");
        match self.config.oom_policy {
            OomPolicy::Abort => handle_alloc_error(layout),
            OomPolicy::ReturnError => AllocError::OutOfMemory { size, align },
        }
    }
}

impl Default for TrackedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedAllocator")
            .field("backend", &self.backend_name)
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish()
    }
}

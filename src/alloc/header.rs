//! Block header convention.
//!
//! Every tracked block is laid out as `[padding][BlockHeader][payload]`. The
//! header sits immediately before the payload and records what the destroy
//! path needs without compile-time type information: payload size, payload
//! alignment and whether the block holds an array.
//!
//! All header arithmetic lives here. The rest of the crate works with [`Block`],
//! a fat pointer carrying the same facts alongside the payload address.

use super::error::AllocError;
use core::alloc::Layout;
use core::mem;
use core::ptr::NonNull;
use core::slice;
use serde::{Deserialize, Serialize};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Bytes occupied by a [`BlockHeader`].
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Payload alignment used by the untyped `allocate` entry points.
pub const DEFAULT_ALIGN: usize = 16;

const ARRAY_FLAG: u32 = 1;

/// Whether a block holds one object or a run of elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// A single object.
    Single,
    /// A contiguous run of elements.
    Array,
}

impl BlockKind {
    /// Returns `true` for [`BlockKind::Array`].
    pub const fn is_array(self) -> bool {
        matches!(self, Self::Array)
    }
}

/// The in-memory record preceding every tracked payload.
///
/// Plain-old-data with no padding, so it can be copied in and out of the
/// block's bytes regardless of the payload's alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct BlockHeader {
    size: u64,
    align: u32,
    flags: u32,
}

impl BlockHeader {
    #[allow(clippy::cast_possible_truncation)]
    fn new(size: usize, align: usize, kind: BlockKind) -> Self {
        Self {
            size: size as u64,
            // `Block::layout_for` rejects alignments that do not fit.
            align: align as u32,
            flags: if kind.is_array() { ARRAY_FLAG } else { 0 },
        }
    }

    /// Payload bytes, excluding the header.
    #[allow(clippy::cast_possible_truncation)]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Payload alignment.
    pub fn align(&self) -> usize {
        self.align as usize
    }

    /// Single object or array.
    pub fn kind(&self) -> BlockKind {
        if self.flags & ARRAY_FLAG != 0 {
            BlockKind::Array
        } else {
            BlockKind::Single
        }
    }

    /// Returns `true` if the block holds an array.
    pub fn is_array(&self) -> bool {
        self.kind().is_array()
    }

    /// Returns `true` if this header agrees with `block`.
    pub fn describes(&self, block: &Block) -> bool {
        self.size() == block.size && self.align() == block.align && self.kind() == block.kind
    }
}

/// Layout of a whole block plus the payload's offset from its start.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockLayout {
    pub layout: Layout,
    pub offset: usize,
}

/// A tracked allocation: the payload address and the facts its header records.
///
/// `Block` is a view, not an owner; copying it does not duplicate the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    payload: NonNull<u8>,
    size: usize,
    align: usize,
    kind: BlockKind,
}

impl Block {
    /// Computes the region needed for a payload of `size` bytes aligned to `align`.
    pub(crate) fn layout_for(size: usize, align: usize) -> Result<BlockLayout, AllocError> {
        let overflow = AllocError::LayoutOverflow { size, align };
        if u32::try_from(align).is_err() {
            return Err(overflow);
        }
        let header = Layout::new::<[u8; HEADER_SIZE]>();
        let payload = Layout::from_size_align(size, align).map_err(|_| overflow)?;
        let (layout, offset) = header.extend(payload).map_err(|_| overflow)?;
        debug_assert_eq!(offset, header_offset(align));
        Ok(BlockLayout { layout, offset })
    }

    /// Writes a header at the front of `base` and returns the resulting block.
    ///
    /// # Safety
    /// `base` must point to a live region of at least `layout_for(size, align)` bytes.
    pub(crate) unsafe fn init(base: NonNull<u8>, size: usize, align: usize, kind: BlockKind) -> Self {
        // SAFETY: the region extends past the header offset by the caller's contract.
        let payload = unsafe { NonNull::new_unchecked(base.as_ptr().add(header_offset(align))) };
        let block = Self {
            payload,
            size,
            align,
            kind,
        };
        // SAFETY: the header slot lies inside the region.
        unsafe { block.write_header() };
        block
    }

    /// Rebuilds a block view from ledger facts.
    ///
    /// # Safety
    /// `payload` must be the payload address of a live block with these facts.
    pub(crate) unsafe fn from_parts(payload: NonNull<u8>, size: usize, align: usize, kind: BlockKind) -> Self {
        Self {
            payload,
            size,
            align,
            kind,
        }
    }

    /// Copies this block's facts into its header slot.
    ///
    /// # Safety
    /// The block must be live.
    pub(crate) unsafe fn write_header(&self) {
        let header = BlockHeader::new(self.size, self.align, self.kind);
        // SAFETY: HEADER_SIZE bytes precede every payload.
        let slot = unsafe { slice::from_raw_parts_mut(self.payload.as_ptr().sub(HEADER_SIZE), HEADER_SIZE) };
        slot.copy_from_slice(header.as_bytes());
    }

    /// Reads the header preceding `payload`.
    ///
    /// # Safety
    /// `payload` must be the payload address of a live block.
    pub(crate) unsafe fn read_header(payload: NonNull<u8>) -> BlockHeader {
        // SAFETY: HEADER_SIZE bytes precede every payload.
        let slot = unsafe { slice::from_raw_parts(payload.as_ptr().sub(HEADER_SIZE), HEADER_SIZE) };
        BlockHeader::read_from(slot).unwrap_or_else(BlockHeader::new_zeroed)
    }

    /// The address handed to callers.
    pub fn payload(&self) -> NonNull<u8> {
        self.payload
    }

    /// The payload address as an integer, the key used by the ledgers.
    pub fn address(&self) -> usize {
        self.payload.as_ptr() as usize
    }

    /// Payload bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Payload alignment.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Single object or array.
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Returns `true` if the block holds an array.
    pub fn is_array(&self) -> bool {
        self.kind.is_array()
    }

    /// Start of the underlying region, header included.
    pub(crate) fn base(&self) -> NonNull<u8> {
        // SAFETY: the payload sits `header_offset` bytes into its region.
        unsafe { NonNull::new_unchecked(self.payload.as_ptr().sub(header_offset(self.align))) }
    }

    /// Layout of the underlying region, header included.
    pub(crate) fn layout(&self) -> Layout {
        // SAFETY: the same size/align pair passed `layout_for` when the block was created.
        unsafe { Layout::from_size_align_unchecked(header_offset(self.align) + self.size, self.align) }
    }
}

/// Offset of the payload from the region start for a given alignment.
const fn header_offset(align: usize) -> usize {
    if align > HEADER_SIZE {
        align
    } else {
        HEADER_SIZE
    }
}

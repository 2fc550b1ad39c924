use core::fmt;

/// The error type for tracked allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The backing allocator could not satisfy the request.
    OutOfMemory {
        /// Payload bytes requested.
        size: usize,
        /// Payload alignment requested.
        align: usize,
    },
    /// The request (payload plus header) does not form a valid layout.
    LayoutOverflow {
        /// Payload bytes requested.
        size: usize,
        /// Payload alignment requested.
        align: usize,
    },
    /// The address has no live entry in the allocation ledger.
    UnknownBlock {
        /// The offending payload address.
        address: usize,
    },
    /// A pointer coercion moved the view away from the constructed value.
    ViewMismatch {
        /// Payload address of the constructed value.
        address: usize,
        /// Address the coerced view pointed at.
        view: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { size, align } => {
                write!(f, "memory allocation of {size} bytes (align {align}) failed")
            }
            Self::LayoutOverflow { size, align } => {
                write!(f, "allocation of {size} bytes (align {align}) overflows the address space")
            }
            Self::UnknownBlock { address } => {
                write!(f, "address {address:#x} is not a live tracked block")
            }
            Self::ViewMismatch { address, view } => {
                write!(f, "coercion moved the view of {address:#x} to {view:#x}")
            }
        }
    }
}

impl std::error::Error for AllocError {}

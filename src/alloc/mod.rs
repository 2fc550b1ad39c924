//! Tracked allocation.
//!
//! [`TrackedAllocator`] pads every request with a [`BlockHeader`] and records the
//! block in its [`AllocationLedger`]. The construct/destroy helpers on the
//! allocator build typed values on top and use the header to tear them down.

pub mod backend;
pub mod config;
pub mod construct;
pub mod error;
pub mod header;
pub mod ledger;
pub mod site;
pub mod stats;
pub mod tracked;

pub use backend::{default_backend, default_backend_name, DefaultBackend};
pub use config::{AllocatorConfig, OomPolicy};
pub use construct::stride_of;
pub use error::AllocError;
pub use header::{Block, BlockHeader, BlockKind, DEFAULT_ALIGN, HEADER_SIZE};
pub use ledger::{AllocationLedger, DumpFormat, LedgerEntry, Operation, OperationKind};
pub use site::Site;
pub use stats::AllocationStats;
pub use tracked::TrackedAllocator;

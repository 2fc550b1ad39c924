//! # `tally` - Tracked Allocation and Ledger-Backed Ownership
//!
//! A small ownership layer for engines that want to know exactly what they
//! have allocated, where, and who still holds it.
//!
//! ## Layers
//!
//! 1. **Tracked allocation** (`TrackedAllocator`):
//!    - Every block carries a hidden header (payload size, alignment, array flag)
//!    - Every block is recorded in an `AllocationLedger` with its call site
//!    - Payloads are zero-filled; statistics and an optional operation log
//!      are kept alongside
//!
//! 2. **Construct/destroy helpers**:
//!    - `construct_one` / `construct_array` place typed values into tracked blocks
//!    - `destroy` takes the element count from the ledger, checks the header
//!      against it, and runs destructors last element first before releasing
//!      the block
//!    - `deallocate_raw` is the separately named path that skips destructors
//!
//! 3. **Collectors** (`Collector`):
//!    - Named address → use-count tables, any number of them
//!    - Decrement and zero test are a single step, so exactly one releaser
//!      sees the zero transition
//!    - `push` is safe; `pop`, `release` and `remove` are `unsafe`, since
//!      dropping a claim a handle holds lets another handle destroy its pointee
//!
//! 4. **Shared handles** (`SharedHandle<T, D>`):
//!    - Copyable owners whose count lives in a collector, not next to the value
//!    - The handle whose release reaches zero runs its `DestroyStrategy`
//!
//! ## Safety Guarantees
//!
//! - **Exactly-once destruction**: across any number of handle copies and
//!   threads, the destroy strategy runs once, after the last release.
//! - **Bookkeeping anomalies never crash**: unknown addresses, underflows and
//!   header disagreements are logged through `tracing` and recorded in the
//!   owning ledger's journal; the operation carries on.
//! - **No hidden globals**: allocators and collectors are passed explicitly.
//!   `Heap::global()` exists for applications that want one, and library code
//!   never calls it.
//!
//! ## Example
//!
//! ```rust
//! use tally::Heap;
//!
//! let heap = Heap::new();
//!
//! let a = heap.share(String::from("widget")).unwrap();
//! let b = a.clone();
//! assert_eq!(a.use_count(), 2);
//!
//! drop(a);
//! assert_eq!(b.get().map(String::as_str), Some("widget"));
//! drop(b);
//!
//! assert!(heap.allocator().ledger().is_empty());
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod alloc;
pub mod diagnostics;
pub mod heap;
pub mod ownership;

mod sync;

pub use alloc::{AllocError, AllocatorConfig, BlockKind, OomPolicy, Site, TrackedAllocator};
pub use diagnostics::{Anomaly, AnomalyJournal, AnomalyKind};
pub use heap::Heap;
pub use ownership::{Collector, DestroyStrategy, ErasedDestroy, PopOutcome, SharedHandle, TypedDestroy};

// Compile-time layout checks.
const _: () = {
    use core::mem;

    // The header is 16 bytes on every target, with no padding.
    assert!(alloc::HEADER_SIZE == 16);

    // A handle is a nullable pointer plus two `Arc`s; the default strategy is a ZST.
    assert!(mem::size_of::<TypedDestroy>() == 0);
    assert!(mem::size_of::<SharedHandle<u64>>() == mem::size_of::<usize>() * 3);
};

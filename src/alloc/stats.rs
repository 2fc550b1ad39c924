use core::sync::atomic::{AtomicU64, Ordering};
use crossbeam_utils::CachePadded;
use serde::Serialize;

/// A point-in-time copy of an allocation ledger's running totals.
///
/// Byte counts are payload bytes; headers are not included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocationStats {
    /// Payload bytes ever allocated (reallocation counts its new size here).
    pub allocated_bytes: u64,
    /// Blocks ever allocated (reallocation counts one here).
    pub allocated_blocks: u64,
    /// Payload bytes ever freed (reallocation counts its old size here).
    pub freed_bytes: u64,
    /// Blocks ever freed (reallocation counts one here).
    pub freed_blocks: u64,
    /// Successful reallocations.
    pub reallocations: u64,
    /// Highest live byte count observed.
    pub peak_live_bytes: u64,
}

impl AllocationStats {
    /// Payload bytes currently live.
    pub fn live_bytes(&self) -> u64 {
        self.allocated_bytes.saturating_sub(self.freed_bytes)
    }

    /// Blocks currently live.
    pub fn live_blocks(&self) -> u64 {
        self.allocated_blocks.saturating_sub(self.freed_blocks)
    }
}

pub(crate) struct LedgerMetrics {
    allocated_bytes: CachePadded<AtomicU64>,
    allocated_blocks: CachePadded<AtomicU64>,
    freed_bytes: CachePadded<AtomicU64>,
    freed_blocks: CachePadded<AtomicU64>,
    reallocations: CachePadded<AtomicU64>,
    live_bytes: CachePadded<AtomicU64>,
    peak_live_bytes: CachePadded<AtomicU64>,
}

impl LedgerMetrics {
    pub(crate) fn new() -> Self {
        Self {
            allocated_bytes: CachePadded::new(AtomicU64::new(0)),
            allocated_blocks: CachePadded::new(AtomicU64::new(0)),
            freed_bytes: CachePadded::new(AtomicU64::new(0)),
            freed_blocks: CachePadded::new(AtomicU64::new(0)),
            reallocations: CachePadded::new(AtomicU64::new(0)),
            live_bytes: CachePadded::new(AtomicU64::new(0)),
            peak_live_bytes: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub(crate) fn on_alloc(&self, size: usize) {
        let size = size as u64;
        self.allocated_blocks.fetch_add(1, Ordering::Relaxed);
        self.allocated_bytes.fetch_add(size, Ordering::Relaxed);
        let live = self.live_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_live_bytes.fetch_max(live, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_dealloc(&self, size: usize) {
        let size = size as u64;
        self.freed_blocks.fetch_add(1, Ordering::Relaxed);
        self.freed_bytes.fetch_add(size, Ordering::Relaxed);
        self.live_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_realloc(&self, old_size: usize, new_size: usize) {
        self.reallocations.fetch_add(1, Ordering::Relaxed);
        self.on_dealloc(old_size);
        self.on_alloc(new_size);
    }

    pub(crate) fn snapshot(&self) -> AllocationStats {
        AllocationStats {
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            allocated_blocks: self.allocated_blocks.load(Ordering::Relaxed),
            freed_bytes: self.freed_bytes.load(Ordering::Relaxed),
            freed_blocks: self.freed_blocks.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            peak_live_bytes: self.peak_live_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_high_water_mark() {
        let metrics = LedgerMetrics::new();
        metrics.on_alloc(100);
        metrics.on_alloc(50);
        metrics.on_dealloc(100);
        metrics.on_alloc(10);

        let stats = metrics.snapshot();
        assert_eq!(stats.peak_live_bytes, 150);
        assert_eq!(stats.live_bytes(), 60);
        assert_eq!(stats.live_blocks(), 2);
    }

    #[test]
    fn realloc_moves_bytes_without_changing_live_blocks() {
        let metrics = LedgerMetrics::new();
        metrics.on_alloc(8);
        metrics.on_realloc(8, 32);

        let stats = metrics.snapshot();
        assert_eq!(stats.reallocations, 1);
        assert_eq!(stats.live_blocks(), 1);
        assert_eq!(stats.live_bytes(), 32);
    }
}

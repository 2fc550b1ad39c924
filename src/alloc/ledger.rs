//! The allocation ledger: the single source of truth for what lives where.
//!
//! Every tracked block has exactly one [`LedgerEntry`] for as long as it is
//! allocated. The destroy path consults the ledger (and the block header it
//! describes) to decide how many destructors to run, so no type information
//! has to survive from the construction site.

use super::header::{Block, BlockKind};
use super::site::Site;
use super::stats::{AllocationStats, LedgerMetrics};
use crate::diagnostics::{Anomaly, AnomalyJournal, AnomalyKind};
use crate::sync::lock;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

const SCOPE: &str = "allocation-ledger";

/// Metadata for one live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Payload address.
    pub address: usize,
    /// Payload bytes.
    pub size: usize,
    /// Payload alignment.
    pub align: usize,
    /// Single object or array.
    pub kind: BlockKind,
    /// Where the block was allocated (or last reallocated).
    pub site: Site,
    /// Position of the creating operation in the ledger's history.
    pub ordinal: u64,
}

impl LedgerEntry {
    /// Returns `true` if the block holds an array.
    pub fn is_array(&self) -> bool {
        self.kind.is_array()
    }
}

/// What a logged operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum OperationKind {
    /// A fresh block.
    Allocate,
    /// A resize; `from` is the previous payload address.
    Reallocate {
        /// Payload address before the resize.
        from: usize,
    },
    /// A release.
    Deallocate,
}

/// One entry of the chronological operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Operation {
    /// Monotonic position in the ledger's history.
    pub ordinal: u64,
    /// What happened.
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Payload address after the operation (before it, for deallocation).
    pub address: usize,
    /// Payload bytes involved.
    pub size: usize,
    /// Single object or array.
    pub block: BlockKind,
    /// Caller location.
    pub site: Site,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:<6} ", self.ordinal)?;
        match self.kind {
            OperationKind::Allocate => write!(f, "allocate   {:#x}", self.address)?,
            OperationKind::Reallocate { from } => write!(f, "reallocate {from:#x} -> {:#x}", self.address)?,
            OperationKind::Deallocate => write!(f, "deallocate {:#x}", self.address)?,
        }
        write!(
            f,
            " size={} array={} at {}",
            self.size,
            self.block.is_array(),
            self.site
        )
    }
}

/// Output encoding for [`AllocationLedger::dump`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Address-keyed table of live blocks with running statistics.
pub struct AllocationLedger {
    entries: Mutex<HashMap<usize, LedgerEntry>>,
    log: Option<Mutex<Vec<Operation>>>,
    next_ordinal: AtomicU64,
    metrics: LedgerMetrics,
    journal: AnomalyJournal,
}

impl AllocationLedger {
    /// Creates an empty ledger.
    ///
    /// With `record_operations` set, every operation is also appended to a
    /// chronological log (see [`operation_log`](Self::operation_log)).
    pub fn new(record_operations: bool, journal_capacity: usize) -> Self {
        tracing::debug!(record_operations, "allocation ledger created");
        Self {
            entries: Mutex::new(HashMap::new()),
            log: record_operations.then(|| Mutex::new(Vec::new())),
            next_ordinal: AtomicU64::new(0),
            metrics: LedgerMetrics::new(),
            journal: AnomalyJournal::new(journal_capacity),
        }
    }

    /// Records a freshly allocated block.
    pub(crate) fn insert(&self, block: &Block, site: Site) {
        let mut entries = lock(&self.entries);
        let entry = self.entry_for(block, site);
        if entries.insert(entry.address, entry).is_some() {
            self.journal.record(
                SCOPE,
                Anomaly::new(AnomalyKind::DuplicateAddress, entry.address, "allocate").at(site),
            );
        }
        self.metrics.on_alloc(entry.size);
        self.append(entry.ordinal, OperationKind::Allocate, block, site);
    }

    /// Removes and returns the entry for `address` ahead of a resize, without
    /// touching statistics. Pair with [`restore`](Self::restore) or
    /// [`complete_resize`](Self::complete_resize).
    ///
    /// The entry leaves the table before the backing allocator frees the old
    /// region, so a concurrent allocation landing on that address never
    /// collides with it.
    pub(crate) fn begin_resize(&self, address: usize, site: Site) -> Option<LedgerEntry> {
        let taken = lock(&self.entries).remove(&address);
        if taken.is_none() {
            self.report_unknown(address, "reallocate", site);
        }
        taken
    }

    /// Puts back an entry taken by `begin_resize` after a failed resize.
    pub(crate) fn restore(&self, entry: LedgerEntry) {
        lock(&self.entries).insert(entry.address, entry);
    }

    /// Records the outcome of a successful resize.
    pub(crate) fn complete_resize(&self, old: &LedgerEntry, block: &Block, site: Site) {
        let mut entries = lock(&self.entries);
        let entry = self.entry_for(block, site);
        if entries.insert(entry.address, entry).is_some() {
            self.journal.record(
                SCOPE,
                Anomaly::new(AnomalyKind::DuplicateAddress, entry.address, "reallocate").at(site),
            );
        }
        self.metrics.on_realloc(old.size, entry.size);
        self.append(
            entry.ordinal,
            OperationKind::Reallocate { from: old.address },
            block,
            site,
        );
    }

    /// Erases the entry for `address`, returning it. Unknown addresses are
    /// reported and yield `None`.
    pub(crate) fn erase(&self, address: usize, site: Site) -> Option<LedgerEntry> {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.remove(&address) else {
            drop(entries);
            self.report_unknown(address, "deallocate", site);
            return None;
        };
        self.metrics.on_dealloc(entry.size);
        if let Some(log) = &self.log {
            let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
            lock(log).push(Operation {
                ordinal,
                kind: OperationKind::Deallocate,
                address,
                size: entry.size,
                block: entry.kind,
                site,
            });
        }
        Some(entry)
    }

    pub(crate) fn report_unknown(&self, address: usize, operation: &'static str, site: Site) {
        self.journal.record(
            SCOPE,
            Anomaly::new(AnomalyKind::UnknownBlock, address, operation).at(site),
        );
    }

    pub(crate) fn report(&self, anomaly: Anomaly) {
        self.journal.record(SCOPE, anomaly);
    }

    fn entry_for(&self, block: &Block, site: Site) -> LedgerEntry {
        LedgerEntry {
            address: block.address(),
            size: block.size(),
            align: block.align(),
            kind: block.kind(),
            site,
            ordinal: self.next_ordinal.fetch_add(1, Ordering::Relaxed),
        }
    }

    // Called with the entries lock held so log order matches table order.
    fn append(&self, ordinal: u64, kind: OperationKind, block: &Block, site: Site) {
        if let Some(log) = &self.log {
            lock(log).push(Operation {
                ordinal,
                kind,
                address: block.address(),
                size: block.size(),
                block: block.kind(),
                site,
            });
        }
    }

    /// Looks up the live entry for `ptr`.
    pub fn block_for<T: ?Sized>(&self, ptr: *const T) -> Option<LedgerEntry> {
        lock(&self.entries).get(&(ptr.cast::<()>() as usize)).copied()
    }

    /// Returns `true` if `ptr` is the payload address of a live block.
    pub fn contains<T: ?Sized>(&self, ptr: *const T) -> bool {
        lock(&self.entries).contains_key(&(ptr.cast::<()>() as usize))
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` if no block is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Running totals.
    pub fn statistics(&self) -> AllocationStats {
        self.metrics.snapshot()
    }

    /// Every live block, oldest first. Useful as a leak report at shutdown.
    pub fn live_blocks(&self) -> Vec<LedgerEntry> {
        let mut live: Vec<_> = lock(&self.entries).values().copied().collect();
        live.sort_unstable_by_key(|entry| entry.ordinal);
        live
    }

    /// Returns `true` if this ledger keeps an operation log.
    pub fn records_operations(&self) -> bool {
        self.log.is_some()
    }

    /// A copy of the operation log, or `None` when recording is disabled.
    pub fn operation_log(&self) -> Option<Vec<Operation>> {
        self.log.as_ref().map(|log| lock(log).clone())
    }

    /// Anomalies noticed by this ledger.
    pub fn journal(&self) -> &AnomalyJournal {
        &self.journal
    }

    /// Writes the operation log when recording is enabled, otherwise the
    /// aggregate statistics.
    ///
    /// # Errors
    /// Propagates write or encoding failures from `out`.
    pub fn dump<W: io::Write>(&self, mut out: W, format: DumpFormat) -> io::Result<()> {
        match (self.operation_log(), format) {
            (Some(ops), DumpFormat::Text) => {
                writeln!(out, "allocation log ({} operations)", ops.len())?;
                for op in &ops {
                    writeln!(out, "{op}")?;
                }
                Ok(())
            }
            (Some(ops), DumpFormat::Json) => {
                serde_json::to_writer_pretty(&mut out, &ops)?;
                writeln!(out)
            }
            (None, DumpFormat::Text) => {
                let stats = self.statistics();
                writeln!(out, "allocation statistics")?;
                writeln!(
                    out,
                    "  allocated: {} bytes in {} blocks",
                    stats.allocated_bytes, stats.allocated_blocks
                )?;
                writeln!(
                    out,
                    "  freed:     {} bytes in {} blocks",
                    stats.freed_bytes, stats.freed_blocks
                )?;
                writeln!(out, "  live:      {} bytes in {} blocks", stats.live_bytes(), stats.live_blocks())?;
                writeln!(out, "  peak live: {} bytes", stats.peak_live_bytes)?;
                writeln!(out, "  reallocations: {}", stats.reallocations)?;
                writeln!(out, "  anomalies: {}", self.journal.total())
            }
            (None, DumpFormat::Json) => {
                serde_json::to_writer_pretty(&mut out, &self.statistics())?;
                writeln!(out)
            }
        }
    }
}

impl fmt::Debug for AllocationLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationLedger")
            .field("live_blocks", &self.len())
            .field("records_operations", &self.records_operations())
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;

    fn fake_block(address: usize, size: usize, kind: BlockKind) -> Block {
        // Never dereferenced: the ledger only stores the facts.
        unsafe { Block::from_parts(NonNull::new(address as *mut u8).unwrap(), size, 8, kind) }
    }

    #[test]
    fn erase_of_unknown_address_is_journaled() {
        let ledger = AllocationLedger::new(false, 8);
        assert!(ledger.erase(0x1000, Site::unknown()).is_none());
        assert_eq!(ledger.journal().count(AnomalyKind::UnknownBlock), 1);
        assert_eq!(ledger.statistics(), AllocationStats::default());
    }

    #[test]
    fn resize_round_trip_updates_address() {
        let ledger = AllocationLedger::new(true, 8);
        let site = Site::unknown();
        ledger.insert(&fake_block(0x1000, 8, BlockKind::Single), site);

        let old = ledger.begin_resize(0x1000, site).unwrap();
        ledger.complete_resize(&old, &fake_block(0x2000, 32, BlockKind::Single), site);

        assert!(ledger.block_for(0x1000 as *const u8).is_none());
        assert_eq!(ledger.block_for(0x2000 as *const u8).unwrap().size, 32);

        let log = ledger.operation_log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].kind, OperationKind::Reallocate { from: 0x1000 });
    }

    #[test]
    fn duplicate_insert_is_journaled() {
        let ledger = AllocationLedger::new(false, 8);
        let block = fake_block(0x3000, 4, BlockKind::Array);
        ledger.insert(&block, Site::unknown());
        ledger.insert(&block, Site::unknown());
        assert_eq!(ledger.journal().count(AnomalyKind::DuplicateAddress), 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn json_dump_of_statistics_parses() {
        let ledger = AllocationLedger::new(false, 8);
        ledger.insert(&fake_block(0x4000, 16, BlockKind::Single), Site::unknown());

        let mut out = Vec::new();
        ledger.dump(&mut out, DumpFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["allocated_bytes"], 16);
        assert_eq!(value["allocated_blocks"], 1);
    }

    #[test]
    fn json_dump_of_log_tags_operations() {
        let ledger = AllocationLedger::new(true, 8);
        ledger.insert(&fake_block(0x5000, 16, BlockKind::Array), Site::unknown());
        ledger.erase(0x5000, Site::unknown());

        let mut out = Vec::new();
        ledger.dump(&mut out, DumpFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["op"], "allocate");
        assert_eq!(value[0]["block"], "array");
        assert_eq!(value[1]["op"], "deallocate");
    }
}

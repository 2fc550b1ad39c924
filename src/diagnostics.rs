//! Bookkeeping anomalies.
//!
//! Unknown addresses, counter underflows and header disagreements are
//! programmer errors elsewhere in the process. They never abort the operation
//! they occur in; instead they are logged at `warn` level and recorded in the
//! owning ledger's [`AnomalyJournal`] so tests and diagnostics can see them.

use crate::alloc::Site;
use crate::sync::lock;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of anomalies retained in a journal's history.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 256;

/// Classification of a bookkeeping anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    /// An address with no ledger entry was released, resized or looked up for destruction.
    UnknownBlock,
    /// A use-count was decremented while already zero.
    Underflow,
    /// A block's in-memory header disagrees with its ledger entry.
    HeaderMismatch,
    /// A fresh block was recorded at an address the ledger still considered live.
    DuplicateAddress,
}

impl AnomalyKind {
    /// Every kind, in counter order.
    pub const ALL: [Self; 4] = [
        Self::UnknownBlock,
        Self::Underflow,
        Self::HeaderMismatch,
        Self::DuplicateAddress,
    ];

    const fn index(self) -> usize {
        match self {
            Self::UnknownBlock => 0,
            Self::Underflow => 1,
            Self::HeaderMismatch => 2,
            Self::DuplicateAddress => 3,
        }
    }
}

/// One recorded anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    /// What went wrong.
    pub kind: AnomalyKind,
    /// The address involved.
    pub address: usize,
    /// The operation that noticed it (`"deallocate"`, `"pop"`, ...).
    pub operation: &'static str,
    /// Caller location, when the operation carried one.
    pub site: Option<Site>,
}

impl Anomaly {
    /// Creates an anomaly record without a call site.
    pub const fn new(kind: AnomalyKind, address: usize, operation: &'static str) -> Self {
        Self {
            kind,
            address,
            operation,
            site: None,
        }
    }

    /// Attaches the caller's site.
    #[must_use]
    pub const fn at(mut self, site: Site) -> Self {
        self.site = Some(site);
        self
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} during {} of {:#x}", self.kind, self.operation, self.address)?;
        if let Some(site) = &self.site {
            write!(f, " at {site}")?;
        }
        Ok(())
    }
}

/// Per-kind counters plus a bounded history of recent anomalies.
pub struct AnomalyJournal {
    counts: [CachePadded<AtomicU64>; AnomalyKind::ALL.len()],
    recent: Mutex<VecDeque<Anomaly>>,
    capacity: usize,
}

impl AnomalyJournal {
    /// Creates a journal retaining at most `capacity` recent anomalies.
    pub fn new(capacity: usize) -> Self {
        Self {
            counts: Default::default(),
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_JOURNAL_CAPACITY))),
            capacity,
        }
    }

    /// Logs and records `anomaly` on behalf of `scope` (a ledger or collector name).
    pub fn record(&self, scope: &str, anomaly: Anomaly) {
        tracing::warn!(
            scope,
            kind = ?anomaly.kind,
            address = format_args!("{:#x}", anomaly.address),
            operation = anomaly.operation,
            site = anomaly.site.as_ref().map(tracing::field::display),
            "bookkeeping anomaly"
        );
        self.counts[anomaly.kind.index()].fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return;
        }
        let mut recent = lock(&self.recent);
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(anomaly);
    }

    /// Total anomalies of `kind` ever recorded.
    pub fn count(&self, kind: AnomalyKind) -> u64 {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Total anomalies of every kind ever recorded.
    pub fn total(&self) -> u64 {
        AnomalyKind::ALL.iter().map(|&kind| self.count(kind)).sum()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// The retained history, oldest first.
    pub fn recent(&self) -> Vec<Anomaly> {
        lock(&self.recent).iter().copied().collect()
    }

    /// Maximum retained history length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AnomalyJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl fmt::Debug for AnomalyJournal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnomalyJournal")
            .field("total", &self.total())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

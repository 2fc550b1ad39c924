//! `Collector`: a named use-count table keyed by address.
//!
//! A collector knows nothing about what lives at an address; it only counts
//! how many handles currently claim it. Independent collectors may coexist
//! (one per subsystem, say), but every handle sharing an address must use the
//! same collector or the count means nothing.

use crate::diagnostics::{Anomaly, AnomalyJournal, AnomalyKind, DEFAULT_JOURNAL_CAPACITY};
use crate::sync::lock;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Result of decrementing an address's use-count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    /// Other claims remain.
    Shared {
        /// Use-count after this decrement.
        remaining: usize,
    },
    /// This call took the count from 1 to 0. Exactly one caller sees this per
    /// registration cycle.
    Last,
    /// The count was already 0; it stays there and the attempt is journaled.
    Saturated,
    /// The address is not registered; journaled.
    Unregistered,
}

impl PopOutcome {
    /// Returns `true` if this call caused the zero transition.
    pub fn is_last(self) -> bool {
        matches!(self, Self::Last)
    }
}

/// A thread-safe address → use-count table.
pub struct Collector {
    name: Cow<'static, str>,
    entries: Mutex<HashMap<usize, usize>>,
    journal: AnomalyJournal,
}

#[inline]
fn key<T: ?Sized>(ptr: *const T) -> usize {
    ptr.cast::<()>() as usize
}

impl Collector {
    /// Creates an empty collector.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_journal_capacity(name, DEFAULT_JOURNAL_CAPACITY)
    }

    /// Creates an empty collector retaining `capacity` recent anomalies.
    pub fn with_journal_capacity(name: impl Into<Cow<'static, str>>, capacity: usize) -> Self {
        let name = name.into();
        tracing::debug!(collector = %name, "collector created");
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            journal: AnomalyJournal::new(capacity),
        }
    }

    /// The collector's name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds one claim on `ptr`, registering it with a count of 1 if new.
    /// Returns the count after the increment. Null is never registered.
    pub fn push<T: ?Sized>(&self, ptr: *const T) -> usize {
        if ptr.is_null() {
            return 0;
        }
        let address = key(ptr);
        let count = {
            let mut entries = lock(&self.entries);
            let count = entries.entry(address).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        tracing::trace!(collector = %self.name, address = format_args!("{address:#x}"), count, "push");
        count
    }

    /// Drops one claim on `ptr`, saturating at zero.
    ///
    /// The entry is kept even when it reaches zero; [`remove`](Self::remove) it
    /// once the owner has been dealt with, or use [`release`](Self::release)
    /// to do both in one step.
    ///
    /// # Safety
    /// The caller must own the claim being dropped (one it added with
    /// [`push`](Self::push)), or `ptr` must not be bound to any
    /// [`SharedHandle`](super::SharedHandle) using this collector. Dropping a
    /// handle's claim lets another handle destroy the pointee while it is
    /// still bound.
    pub unsafe fn pop<T: ?Sized>(&self, ptr: *const T) -> PopOutcome {
        self.decrement(key(ptr), false)
    }

    /// Drops one claim on `ptr` and erases the entry in the same critical
    /// section if this was the last one.
    ///
    /// Because the erase is atomic with the decrement, a dead address never
    /// lingers in the table, so memory reused at that address starts counting
    /// from scratch.
    ///
    /// # Safety
    /// The caller must own the claim being dropped (one it added with
    /// [`push`](Self::push)), or `ptr` must not be bound to any
    /// [`SharedHandle`](super::SharedHandle) using this collector. Dropping a
    /// handle's claim lets another handle destroy the pointee while it is
    /// still bound.
    pub unsafe fn release<T: ?Sized>(&self, ptr: *const T) -> PopOutcome {
        self.decrement(key(ptr), true)
    }

    fn decrement(&self, address: usize, purge: bool) -> PopOutcome {
        let operation = if purge { "release" } else { "pop" };
        let outcome = {
            let mut entries = lock(&self.entries);
            match entries.get_mut(&address) {
                None => PopOutcome::Unregistered,
                Some(0) => PopOutcome::Saturated,
                Some(1) => {
                    if purge {
                        entries.remove(&address);
                    } else {
                        entries.insert(address, 0);
                    }
                    PopOutcome::Last
                }
                Some(count) => {
                    *count -= 1;
                    PopOutcome::Shared { remaining: *count }
                }
            }
        };
        match outcome {
            PopOutcome::Unregistered => self.journal.record(
                &self.name,
                Anomaly::new(AnomalyKind::UnknownBlock, address, operation),
            ),
            PopOutcome::Saturated => self
                .journal
                .record(&self.name, Anomaly::new(AnomalyKind::Underflow, address, operation)),
            _ => {}
        }
        tracing::trace!(
            collector = %self.name,
            address = format_args!("{address:#x}"),
            outcome = ?outcome,
            "{operation}"
        );
        outcome
    }

    /// Erases the entry for `ptr` whatever its count. Returns the count it had,
    /// or `None` (journaled) if it was not registered.
    ///
    /// # Safety
    /// The caller must own every remaining claim on `ptr`, or `ptr` must not be bound to any
    /// [`SharedHandle`](super::SharedHandle) using this collector. Dropping a
    /// handle's claim lets another handle destroy the pointee while it is
    /// still bound.
    pub unsafe fn remove<T: ?Sized>(&self, ptr: *const T) -> Option<usize> {
        let address = key(ptr);
        let removed = lock(&self.entries).remove(&address);
        if removed.is_none() {
            self.journal.record(
                &self.name,
                Anomaly::new(AnomalyKind::UnknownBlock, address, "remove"),
            );
        }
        removed
    }

    /// Current use-count of `ptr`, or 0 if unregistered.
    pub fn utility_of<T: ?Sized>(&self, ptr: *const T) -> usize {
        lock(&self.entries).get(&key(ptr)).copied().unwrap_or(0)
    }

    /// Returns `true` if `ptr` has an entry (even one at zero).
    pub fn exists<T: ?Sized>(&self, ptr: *const T) -> bool {
        lock(&self.entries).contains_key(&key(ptr))
    }

    /// Number of registered addresses.
    pub fn count(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Anomalies noticed by this collector.
    pub fn journal(&self) -> &AnomalyJournal {
        &self.journal
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("name", &self.name)
            .field("count", &self.count())
            .field("journal", &self.journal)
            .finish()
    }
}

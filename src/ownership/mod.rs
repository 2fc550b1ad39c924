//! Shared ownership on top of tracked allocation.
//!
//! A [`Collector`] counts claims per address; a [`SharedHandle`] is one claim.
//! What happens when the last claim goes away is the handle's
//! [`DestroyStrategy`].

pub mod collector;
pub mod handle;
pub mod strategy;

pub use collector::{Collector, PopOutcome};
pub use handle::SharedHandle;
pub use strategy::{DestroyStrategy, ErasedDestroy, FnDestroy, RawDeallocate, TypedDestroy};

//! Backing allocator selection.
//!
//! The tracked allocator only does bookkeeping; the bytes come from whichever
//! `GlobalAlloc` the build selects. Feature precedence when several are on:
//! mimalloc, jemalloc, snmalloc, then the system allocator.

#[cfg(feature = "alloc-mimalloc")]
mod selected {
    pub type DefaultBackend = mimalloc::MiMalloc;
    pub const NAME: &str = "mimalloc";
    pub const fn backend() -> DefaultBackend {
        mimalloc::MiMalloc
    }
}

#[cfg(all(feature = "alloc-jemalloc", not(feature = "alloc-mimalloc")))]
mod selected {
    pub type DefaultBackend = jemallocator::Jemalloc;
    pub const NAME: &str = "jemalloc";
    pub const fn backend() -> DefaultBackend {
        jemallocator::Jemalloc
    }
}

#[cfg(all(
    feature = "alloc-snmalloc",
    not(any(feature = "alloc-mimalloc", feature = "alloc-jemalloc"))
))]
mod selected {
    pub type DefaultBackend = snmalloc_rs::SnMalloc;
    pub const NAME: &str = "snmalloc";
    pub const fn backend() -> DefaultBackend {
        snmalloc_rs::SnMalloc
    }
}

#[cfg(not(any(
    feature = "alloc-mimalloc",
    feature = "alloc-jemalloc",
    feature = "alloc-snmalloc"
)))]
mod selected {
    pub type DefaultBackend = std::alloc::System;
    pub const NAME: &str = "system";
    pub const fn backend() -> DefaultBackend {
        std::alloc::System
    }
}

/// The backing allocator chosen by cargo features.
pub use selected::DefaultBackend;

/// Name of the feature-selected backing allocator.
pub const fn default_backend_name() -> &'static str {
    selected::NAME
}

/// An instance of the feature-selected backing allocator.
pub const fn default_backend() -> DefaultBackend {
    selected::backend()
}

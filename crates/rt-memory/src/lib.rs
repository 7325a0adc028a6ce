//! Memory substrate: OS-mapped regions and the sub-heaps carved out of them.
//!
//! Every other subsystem allocates through a [`Heap`] it owns; heaps never
//! allocate directly from the global allocator so that guard-page escorts
//! and leak-tag accounting are uniform across the runtime.

mod heap;
mod region;

pub use heap::{Heap, HeapMetrics, HeapMode};
pub use region::{GuardPageMode, Region};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to map {size} bytes: {source}")]
    Map {
        size: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to change protection on region: {0}")]
    Protect(#[source] std::io::Error),
    #[error("pointer {0:#x} does not belong to this heap")]
    ForeignPointer(usize),
    #[error("allocation of {requested} bytes exceeds heap capacity ({capacity} bytes)")]
    OutOfMemory { requested: usize, capacity: usize },
}

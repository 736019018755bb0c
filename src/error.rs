//! Error types for segalloc.
//!
//! Most of the core's defensive behavior (double free, foreign pointer,
//! split collision) is a silent no-op by design (see the crate-level
//! docs) rather than a reported error — there is no room in a C-style
//! `malloc`/`free` ABI to surface them. [`AllocError`] instead covers the
//! handful of conditions an embedder legitimately wants to observe:
//! exhaustion of the page provider, and parameter misuse at the `PageSource`
//! boundary.

use thiserror::Error;

/// Errors surfaced by the allocator's ambient stack (page provider and
/// extent bookkeeping). The hot allocate/free path never returns this type;
/// it communicates failure to its caller via `None`, exactly like `malloc`
/// returning `NULL`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The page provider could not satisfy a request for more pages, and no
    /// existing extent had room either.
    #[error("out of memory: page provider could not supply {pages} page(s)")]
    OutOfMemory {
        /// Number of pages that were requested.
        pages: usize,
    },

    /// `zero_allocate(count, size)` would overflow computing `count * size`.
    #[error("zero_allocate overflow: {count} * {size} does not fit in usize")]
    SizeOverflow {
        /// Requested element count.
        count: usize,
        /// Requested element size.
        size: usize,
    },

    /// A `PageSource` implementation was asked to acquire zero pages, which
    /// is a contract violation rather than a recoverable condition.
    #[error("invalid page count: {0}")]
    InvalidPageCount(usize),
}

/// Result alias for fallible ambient-stack operations.
pub type Result<T> = std::result::Result<T, AllocError>;

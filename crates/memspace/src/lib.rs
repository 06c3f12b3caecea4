//! A simulated word-addressed memory space.
//!
//! This crate models, in user space, the bookkeeping a real allocator
//! performs over a fixed-size arena: which address ranges are in use, how an
//! allocation request is satisfied from the remaining free space, and how
//! released ranges are reclaimed for reuse. Nothing is actually allocated;
//! the "memory" is purely the two ledgers of address ranges.
//!
//! # Algorithm
//!
//! [`MemorySpace`] keeps two [`BlockList`] ledgers, one for free blocks and
//! one for allocated blocks, both in insertion order:
//!
//! - **Allocation** ([`malloc`](MemorySpace::malloc)) scans the free ledger
//!   in its current order and takes the *first* block long enough
//!   (first-fit, not best-fit). A longer block is shrunk from the front in
//!   place; an exact-length block relocates to the allocated ledger.
//! - **Release** ([`free`](MemorySpace::free)) matches the base address
//!   against the allocated ledger and splices the block, unchanged, onto the
//!   tail of the free ledger. Freed blocks are *not* merged with their
//!   neighbors.
//! - **Compaction** ([`defrag`](MemorySpace::defrag)) is the explicit
//!   coalescing pass: it merges adjacent free blocks until none remain.
//!   `malloc` never triggers it, not even on failure; a caller that wants
//!   the free space compacted asks for it.
//!
//! # Usage Example
//!
//! ```
//! use memspace::MemorySpace;
//!
//! let mut mem = MemorySpace::new(100);
//!
//! let a = mem.malloc(20)?;
//! let b = mem.malloc(30)?;
//! assert_eq!((a, b), (0, 20));
//!
//! mem.free(a)?;
//! mem.free(b)?;
//!
//! // The two freed blocks stay fragmented until defrag runs.
//! assert_eq!(mem.largest_free_len(), 50);
//! mem.defrag();
//! assert_eq!(mem.largest_free_len(), 100);
//! # Ok::<(), Box<dyn core::error::Error>>(())
//! ```
//!
//! # Performance Characteristics
//!
//! - **malloc**: O(n) over the free ledger
//! - **free**: O(n) over the allocated ledger
//! - **defrag**: O(n²) over the free ledger
//!
//! # Thread Safety
//!
//! The space is `Send` but performs no internal locking. `malloc` and `free`
//! each touch both ledgers and `defrag` must not observe a half-finished
//! mutation, so a concurrent host has to serialize all three operations
//! behind one exclusive lock guarding the whole `MemorySpace`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use snafu::{Location, Snafu};

pub use block_list::{Block, BlockList};

pub use self::space::MemorySpace;

mod space;

/// Errors that can occur during allocation.
///
/// Neither variant leaves any state mutated; the caller may change the
/// space (by freeing or defragmenting) and retry.
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(module)]
pub enum MallocError {
    /// The requested length was zero. A block always spans at least one
    /// word, so this is a caller bug.
    #[snafu(display("cannot allocate a block of length {len}"))]
    InvalidLength {
        len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// No free block is long enough to hold the request. Recoverable: the
    /// caller can `free` or `defrag` and retry.
    #[snafu(display("no free block of at least {requested} words"))]
    OutOfMemory {
        requested: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors that can occur when releasing a block.
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(module)]
pub enum FreeError {
    /// The address is not the base of any allocated block: a double free, an
    /// address that `malloc` never returned, or an address in the middle of
    /// a block. Silently ignoring this would mask a leak, so it is always
    /// surfaced.
    #[snafu(display("address {addr} is not the base of an allocated block"))]
    UnknownAddress {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

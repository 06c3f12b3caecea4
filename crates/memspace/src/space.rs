use alloc::string::{String, ToString as _};
use core::{fmt, mem};

use block_list::{Block, BlockList};
use log::{debug, trace};
use snafu::{OptionExt as _, ensure};

use super::{FreeError, MallocError, free_error, malloc_error};

/// A managed memory space of a fixed size, in words.
///
/// The space tracks which address ranges of the arena `[0, arena_size)` are
/// allocated and which are free. Between every pair of public operations the
/// two ledgers partition the arena exactly: no address is in both ledgers,
/// none is in neither, and the lengths always sum to `arena_size`.
///
/// See the [crate documentation](crate) for the allocation algorithm and the
/// locking requirements of concurrent hosts.
#[derive(Debug, Clone)]
pub struct MemorySpace {
    /// Blocks that are presently free, in insertion order.
    free: BlockList,
    /// Blocks that are presently allocated, in insertion order.
    allocated: BlockList,
    arena_size: usize,
}

impl MemorySpace {
    /// Constructs a new managed memory space of the given size in words.
    ///
    /// The free ledger starts with a single block covering the whole arena;
    /// the allocated ledger starts empty.
    ///
    /// # Panics
    ///
    /// Panics if `arena_size` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use memspace::MemorySpace;
    ///
    /// let mem = MemorySpace::new(1000);
    /// assert_eq!(mem.total_free(), 1000);
    /// assert_eq!(mem.total_allocated(), 0);
    /// ```
    #[must_use]
    pub fn new(arena_size: usize) -> Self {
        assert!(arena_size > 0, "arena size must be positive");
        debug!("MemorySpace::new({arena_size})");

        let mut free = BlockList::new();
        free.push_back(Block::new(0, arena_size));
        Self {
            free,
            allocated: BlockList::new(),
            arena_size,
        }
    }

    /// Allocates a block of the requested length in words and returns its
    /// base address.
    ///
    /// The free ledger is scanned in its current order and the first block
    /// of at least `len` words is taken (first-fit; an earlier long block
    /// wins over a later tighter one). A block longer than the request is
    /// shrunk from the front in place and stays in the free ledger; a block
    /// of exactly the requested length moves to the allocated ledger
    /// unchanged.
    ///
    /// On failure nothing is mutated. An [`OutOfMemory`] failure may be
    /// transient fragmentation: the total free space can exceed `len` even
    /// though no single block does, in which case [`defrag`](Self::defrag)
    /// followed by a retry can succeed. `malloc` never defragments on its
    /// own.
    ///
    /// [`OutOfMemory`]: MallocError::OutOfMemory
    ///
    /// # Examples
    ///
    /// ```
    /// use memspace::MemorySpace;
    ///
    /// let mut mem = MemorySpace::new(1000);
    /// assert_eq!(mem.malloc(17)?, 0);
    /// assert_eq!(mem.malloc(3)?, 17);
    /// assert!(mem.malloc(981).is_err());
    /// # Ok::<(), memspace::MallocError>(())
    /// ```
    pub fn malloc(&mut self, len: usize) -> Result<usize, MallocError> {
        ensure!(len > 0, malloc_error::InvalidLengthSnafu { len });

        let mut fit = None;
        for (index, block) in self.free.iter_mut().enumerate() {
            if block.len < len {
                continue;
            }
            let base = block.base;
            if block.len == len {
                // Exact fit: the whole entry relocates below.
                fit = Some((Some(index), base));
            } else {
                // Shrink the found block from the front, in place. The
                // entry keeps its position in the free ledger.
                block.base += len;
                block.len -= len;
                fit = Some((None, base));
            }
            break;
        }
        let (exact_index, base) =
            fit.context(malloc_error::OutOfMemorySnafu { requested: len })?;

        if let Some(index) = exact_index {
            let removed = self.free.remove_at(index);
            debug_assert_eq!(removed, Some(Block::new(base, len)));
        }
        self.allocated.push_back(Block::new(base, len));

        trace!("malloc({len}) -> {base}");
        self.debug_audit();
        Ok(base)
    }

    /// Frees the allocated block whose base address equals `addr`.
    ///
    /// The block is removed from the allocated ledger and appended,
    /// unchanged, to the tail of the free ledger. It is *not* merged with
    /// adjacent free blocks; a freed block can sit next to another free
    /// block indefinitely until [`defrag`](Self::defrag) runs.
    ///
    /// An address that is not the base of an allocated block (a double
    /// free, an address never returned by [`malloc`](Self::malloc), or an
    /// address inside a block) fails with
    /// [`UnknownAddress`](FreeError::UnknownAddress) and mutates nothing.
    /// An earlier revision ignored unknown addresses silently; that
    /// behavior masks double-free leaks and was dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use memspace::MemorySpace;
    ///
    /// let mut mem = MemorySpace::new(100);
    /// let base = mem.malloc(25).unwrap();
    /// mem.free(base)?;
    /// assert!(mem.free(base).is_err()); // double free
    /// # Ok::<(), memspace::FreeError>(())
    /// ```
    pub fn free(&mut self, addr: usize) -> Result<(), FreeError> {
        let index = self
            .allocated
            .iter()
            .position(|block| block.base == addr)
            .context(free_error::UnknownAddressSnafu { addr })?;

        let Some(block) = self.allocated.remove_at(index) else {
            unreachable!("matched entry vanished from the allocated ledger");
        };
        self.free.push_back(block);

        trace!("free({addr}) -> {} words", block.len);
        self.debug_audit();
        Ok(())
    }

    /// Merges every pair of adjacent free blocks until none remains.
    ///
    /// The free ledger is drained and rebuilt: each block is folded into
    /// the result, absorbing any entry it touches on either side, so the
    /// outcome is the maximal coalescing of the free space. No base address
    /// changes and the total free length is preserved; the allocated ledger
    /// is not touched. Running `defrag` twice in a row changes nothing the
    /// second time.
    ///
    /// The order of the rebuilt free ledger is not part of the contract.
    pub fn defrag(&mut self) {
        let before = self.free.len();

        let mut merged = BlockList::new();
        for mut block in mem::take(&mut self.free) {
            // Absorbing a neighbor can make the grown block adjacent to yet
            // another entry, so rescan until nothing touches it.
            while let Some(index) = merged
                .iter()
                .position(|other| other.is_adjacent_to(&block))
            {
                if let Some(other) = merged.remove_at(index) {
                    block = Block::new(block.base.min(other.base), block.len + other.len);
                }
            }
            merged.push_back(block);
        }
        self.free = merged;

        debug!("defrag: {before} -> {} free blocks", self.free.len());
        self.debug_audit();
    }

    /// Returns the size of the arena in words.
    #[must_use]
    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    /// Returns an iterator over the free ledger in its current order.
    pub fn free_blocks(&self) -> impl Iterator<Item = &Block> + Clone {
        self.free.iter()
    }

    /// Returns an iterator over the allocated ledger in its current order.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = &Block> + Clone {
        self.allocated.iter()
    }

    /// Returns the total free space in words, across all free blocks.
    #[must_use]
    pub fn total_free(&self) -> usize {
        self.free.total_len()
    }

    /// Returns the total allocated space in words.
    #[must_use]
    pub fn total_allocated(&self) -> usize {
        self.allocated.total_len()
    }

    /// Returns the length of the longest free block, or zero if no space is
    /// free.
    ///
    /// The gap between this and [`total_free`](Self::total_free) measures
    /// fragmentation: requests longer than this fail even when the total
    /// free space would suffice.
    #[must_use]
    pub fn largest_free_len(&self) -> usize {
        self.free.iter().map(|block| block.len).max().unwrap_or(0)
    }

    /// Renders both ledgers for diagnostics: the free ledger's blocks in
    /// order, a newline, then the allocated ledger's blocks in order.
    ///
    /// Not part of the algorithmic contract; the output format is meant for
    /// humans reading a test failure or a log.
    #[must_use]
    pub fn debug_render(&self) -> String {
        self.to_string()
    }

    /// Checks the ledger bookkeeping in debug builds.
    ///
    /// A violation here is an allocator bug, never a caller error: the
    /// public operations reject bad input before mutating anything.
    fn debug_audit(&self) {
        if !cfg!(debug_assertions) {
            return;
        }

        debug_assert_eq!(
            self.free.total_len() + self.allocated.total_len(),
            self.arena_size,
            "ledger lengths must sum to the arena size"
        );
        let all = self.free.iter().chain(self.allocated.iter());
        for (i, a) in all.clone().enumerate() {
            debug_assert!(a.len > 0, "zero-length block {a} in a ledger");
            debug_assert!(a.end() <= self.arena_size, "block {a} exceeds the arena");
            for b in all.clone().skip(i + 1) {
                debug_assert!(!a.overlaps(b), "blocks {a} and {b} overlap");
            }
        }
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.free)?;
        writeln!(f, "{}", self.allocated)
    }
}

//! Chunk planning for transaction ingestion
//!
//! Splits `[0, total_rows)` into consecutive half-open ranges of at most
//! `chunk_size` rows. Each range becomes one write transaction.
//!
//! Every boundary is `min(start + chunk_size, total_rows)`; the final range
//! absorbs the remainder and an empty trailing range is never produced.

use std::num::NonZeroUsize;
use std::ops::Range;

/// One planned chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Zero-based position in the plan
    pub index: usize,
    /// First row, inclusive
    pub start: usize,
    /// Last row, exclusive
    pub end: usize,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Plan over `total_rows` rows. Cheap to copy; iterating it twice yields the
/// same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    total_rows: usize,
    chunk_size: NonZeroUsize,
}

impl ChunkPlanner {
    pub fn new(total_rows: usize, chunk_size: NonZeroUsize) -> Self {
        Self {
            total_rows,
            chunk_size,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Number of chunks, `ceil(total_rows / chunk_size)`
    pub fn len(&self) -> usize {
        self.total_rows.div_ceil(self.chunk_size.get())
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows == 0
    }

    /// The chunk at `index`, if the plan has one
    pub fn chunk(&self, index: usize) -> Option<ChunkRange> {
        let start = index.checked_mul(self.chunk_size.get())?;
        if start >= self.total_rows {
            return None;
        }
        let end = start.saturating_add(self.chunk_size.get()).min(self.total_rows);
        Some(ChunkRange { index, start, end })
    }

    pub fn iter(&self) -> Chunks {
        self.starting_at(0)
    }

    /// Resume the sequence at chunk `index`
    pub fn starting_at(&self, index: usize) -> Chunks {
        Chunks {
            planner: *self,
            next: index,
        }
    }
}

impl IntoIterator for &ChunkPlanner {
    type Item = ChunkRange;
    type IntoIter = Chunks;

    fn into_iter(self) -> Chunks {
        self.iter()
    }
}

/// Lazy iterator over a plan
#[derive(Debug, Clone)]
pub struct Chunks {
    planner: ChunkPlanner,
    next: usize,
}

impl Iterator for Chunks {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        let chunk = self.planner.chunk(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.planner.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}

//! Closed integer ranges and the chunk arithmetic behind window planning.
//!
//! Every position in a paged dataset is addressed by a zero-based `i64`
//! index. Window math routinely produces transiently negative endpoints
//! before clamping, and chunk alignment needs floor division over negative
//! deltas, so the whole workspace uses signed positions.

use serde::{Deserialize, Serialize};

/// A closed integer interval `[first, last]`.
///
/// The range is empty iff `first > last`; empty ranges are valid values and
/// all operations treat them as the empty set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    /// First position covered by the range (inclusive).
    pub first: i64,
    /// Last position covered by the range (inclusive).
    pub last: i64,
}

impl PageRange {
    /// Create a range covering `[first, last]`.
    pub fn new(first: i64, last: i64) -> Self {
        Self { first, last }
    }

    /// Create a range covering a single position.
    pub fn single(key: i64) -> Self {
        Self { first: key, last: key }
    }

    /// Whether the range covers no positions.
    pub fn is_empty(&self) -> bool {
        self.first > self.last
    }

    /// Number of positions covered by the range (0 when empty).
    pub fn width(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.last - self.first + 1
        }
    }

    /// Whether `key` lies inside the range.
    pub fn contains(&self, key: i64) -> bool {
        self.first <= key && key <= self.last
    }

    /// Whether the two ranges share at least one position.
    pub fn intersects(&self, other: PageRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.first <= other.last
            && other.first <= self.last
    }

    /// Clamp both endpoints into `bounds`.
    pub fn coerce_in(&self, bounds: PageRange) -> PageRange {
        PageRange::new(
            self.first.clamp(bounds.first, bounds.last),
            self.last.clamp(bounds.first, bounds.last),
        )
    }

    /// Set difference `self \ other`.
    ///
    /// Returns 0, 1, or 2 disjoint ranges in ascending order:
    /// no overlap yields `[self]`, full coverage yields `[]`, a strict
    /// interior overlap yields the two flanking pieces, and a one-sided clip
    /// yields the surviving piece.
    pub fn subtract(&self, other: Option<PageRange>) -> Vec<PageRange> {
        if self.is_empty() {
            return Vec::new();
        }
        let b = match other {
            Some(b) if b.intersects(*self) => b,
            _ => return vec![*self],
        };
        let mut out = Vec::with_capacity(2);
        if b.first > self.first {
            out.push(PageRange::new(self.first, b.first - 1));
        }
        if b.last < self.last {
            out.push(PageRange::new(b.last + 1, self.last));
        }
        out
    }

    /// Partition the range left-to-right into pieces of width `size`.
    ///
    /// Every piece except possibly the last has width exactly `size`. An
    /// empty range partitions into no pieces. `size` must be positive.
    pub fn chunked(&self, size: i64) -> Vec<PageRange> {
        debug_assert!(size > 0, "chunk size must be positive");
        let mut out = Vec::new();
        let mut start = self.first;
        while start <= self.last {
            let end = (start + size - 1).min(self.last);
            out.push(PageRange::new(start, end));
            start = end + 1;
        }
        out
    }

    /// Grow the range rightwards to width `size`, not past `limit`.
    ///
    /// A range already at least `size` wide is returned unchanged; `limit`
    /// is the inclusive last position the expansion may reach.
    pub fn expand_to(&self, size: i64, limit: i64) -> PageRange {
        if self.width() >= size {
            *self
        } else {
            PageRange::new(self.first, (self.first + size - 1).min(limit))
        }
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

/// Gap between a window and a range, in positions of endpoint offset.
///
/// Returns 0 iff the two intersect; otherwise the distance from the
/// window's nearest edge to the range's nearest edge (1 for adjacency).
pub fn distance_beyond(window: PageRange, range: PageRange) -> i64 {
    if window.intersects(range) {
        0
    } else if range.first > window.last {
        range.first - window.last
    } else {
        window.first - range.last
    }
}

/// Start of the `load_size`-aligned chunk containing `key`, relative to `base`.
///
/// Uses floor division, so keys below `base` land in the chunk to the left
/// rather than being truncated toward `base`.
pub fn aligned_chunk_start(key: i64, base: i64, load_size: i64) -> i64 {
    debug_assert!(load_size > 0, "load size must be positive");
    base + (key - base).div_euclid(load_size) * load_size
}

/// The aligned chunk containing `key`, clamped to `[0, max(total_size, 1))`.
pub fn aligned_chunk_containing(key: i64, base: i64, load_size: i64, total_size: i64) -> PageRange {
    let start = aligned_chunk_start(key, base, load_size);
    let bound = total_size.max(1) - 1;
    PageRange::new(start.clamp(0, bound), (start + load_size - 1).clamp(0, bound))
}

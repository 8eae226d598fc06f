//! Component A: half-open integer interval sets.
//!
//! Used by [`crate::segment::SegmentDescriptor::free`] (regions a linker may
//! place new chunks into) and by the assembler's per-chunk written-range
//! bookkeeping (overlap detection for fixed-origin emits, §4.E/§8).
//!
//! No direct teacher analog exists (`aex` never tracks byte ranges); the
//! sorted-`Vec` + `binary_search`-style lookup mirrors the idiom
//! `Vector35-idb-rs` uses throughout for address-to-entry lookups over
//! sorted slices.

use serde::{Deserialize, Serialize};

/// A normalized set of disjoint, ascending, half-open `[lo, hi)` intervals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet {
    intervals: Vec<(i64, i64)>,
}

impl IntervalSet {
    pub fn new() -> Self {
        IntervalSet::default()
    }

    /// Merges `[lo, hi)` into the set, coalescing overlapping or adjacent
    /// intervals. A no-op for empty or inverted ranges. Idempotent.
    pub fn add(&mut self, lo: i64, hi: i64) {
        if lo >= hi {
            return;
        }

        // First interval that could overlap or touch `[lo, hi)` from below.
        let start = self.intervals.partition_point(|&(_, ihi)| ihi < lo);
        // First interval strictly beyond `[lo, hi)`.
        let end = self.intervals.partition_point(|&(ilo, _)| ilo <= hi);

        let merged_lo = self.intervals.get(start).map_or(lo, |&(l, _)| l.min(lo));
        let merged_hi = if end > start {
            self.intervals[end - 1].1.max(hi)
        } else {
            hi
        };

        self.intervals
            .splice(start..end, std::iter::once((merged_lo, merged_hi)));
    }

    /// True iff `x` falls within some interval. O(log n).
    pub fn has(&self, x: i64) -> bool {
        match self.intervals.binary_search_by(|&(lo, _)| lo.cmp(&x)) {
            Ok(_) => true,
            Err(idx) => idx > 0 && self.intervals[idx - 1].1 > x,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.intervals.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn as_slice(&self) -> &[(i64, i64)] {
        &self.intervals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_disjoint_stays_sorted() {
        let mut s = IntervalSet::new();
        s.add(10, 20);
        s.add(0, 5);
        assert_eq!(s.as_slice(), &[(0, 5), (10, 20)]);
    }

    #[test]
    fn add_merges_overlap() {
        let mut s = IntervalSet::new();
        s.add(0, 10);
        s.add(5, 15);
        assert_eq!(s.as_slice(), &[(0, 15)]);
    }

    #[test]
    fn add_merges_adjacent() {
        let mut s = IntervalSet::new();
        s.add(0x8000, 0x8010);
        s.add(0x8010, 0x8110);
        assert_eq!(s.as_slice(), &[(0x8000, 0x8110)]);
    }

    #[test]
    fn add_spans_multiple_existing() {
        let mut s = IntervalSet::new();
        s.add(0, 5);
        s.add(10, 15);
        s.add(20, 25);
        s.add(0, 25);
        assert_eq!(s.as_slice(), &[(0, 25)]);
    }

    #[test]
    fn add_is_idempotent() {
        let mut s = IntervalSet::new();
        s.add(5, 10);
        s.add(5, 10);
        assert_eq!(s.as_slice(), &[(5, 10)]);
    }

    #[test]
    fn add_ignores_empty_range() {
        let mut s = IntervalSet::new();
        s.add(5, 5);
        s.add(5, 2);
        assert!(s.is_empty());
    }

    #[test]
    fn has_checks_half_open_bounds() {
        let mut s = IntervalSet::new();
        s.add(10, 20);
        assert!(s.has(10));
        assert!(s.has(19));
        assert!(!s.has(20));
        assert!(!s.has(9));
    }
}

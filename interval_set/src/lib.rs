//! Sets of disjoint half-open integer intervals.

use std::ops::Range;


/// A normalized set of half-open intervals over `usize`.
///
/// The intervals are kept sorted, disjoint and non-empty; adjacent intervals
/// are coalesced on insertion.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct IntervalSet {
    intervals: Vec<Range<usize>>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The summed length of all intervals.
    pub fn total_len(&self) -> usize {
        self.intervals.iter().map(|interval| interval.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.intervals.iter().cloned()
    }

    /// Add an interval, coalescing with any intervals it touches or overlaps.
    pub fn add(&mut self, interval: Range<usize>) {
        if interval.is_empty() {
            return;
        }

        let start_index = self
            .intervals
            .partition_point(|existing| existing.end < interval.start);
        let end_index = self
            .intervals
            .partition_point(|existing| existing.start <= interval.end);

        let mut merged = interval;
        for existing in &self.intervals[start_index..end_index] {
            merged.start = merged.start.min(existing.start);
            merged.end = merged.end.max(existing.end);
        }
        self.intervals.splice(start_index..end_index, [merged]);
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for interval in other.iter() {
            result.add(interval);
        }
        result
    }

    /// The parts of `domain` not covered by this set.
    pub fn complement(&self, domain: Range<usize>) -> Self {
        let mut intervals = Vec::new();
        let mut cursor = domain.start;

        for interval in &self.intervals {
            if interval.end <= domain.start {
                continue;
            }
            if interval.start >= domain.end {
                break;
            }
            if interval.start > cursor {
                intervals.push(cursor..interval.start.min(domain.end));
            }
            cursor = cursor.max(interval.end);
        }
        if cursor < domain.end {
            intervals.push(cursor..domain.end);
        }

        Self { intervals }
    }

    /// The parts of this set not covered by `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let mut result = Self::new();
        for interval in self.iter() {
            for remainder in other.complement(interval).iter() {
                result.add(remainder);
            }
        }
        result
    }

    pub fn contains(&self, point: usize) -> bool {
        self.intervals
            .binary_search_by(|interval| {
                if interval.end <= point {
                    std::cmp::Ordering::Less
                } else if interval.start > point {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Whether `interval` lies entirely inside a single member interval.
    pub fn covers(&self, interval: &Range<usize>) -> bool {
        if interval.is_empty() {
            return true;
        }
        self.intervals
            .iter()
            .any(|existing| existing.start <= interval.start && interval.end <= existing.end)
    }
}

impl FromIterator<Range<usize>> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = Range<usize>>>(iter: T) -> Self {
        let mut result = Self::new();
        for interval in iter {
            result.add(interval);
        }
        result
    }
}

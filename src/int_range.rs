use std::fmt;

/// A simple type for integer ranges
///
/// All ranges follow the bed file range convention: 0-indexed, half-closed, [start,end)
///
/// Empty ranges (start == end) are legal and represent insertion sites between two bases.
///
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IntRange {
    pub start: i64,
    pub end: i64,
}

impl IntRange {
    pub fn from_pair(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn size(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Return true if pos intersects range (adjacency does not count)
    ///
    pub fn intersect_pos(&self, pos: i64) -> bool {
        pos >= self.start && pos < self.end
    }

    /// Return true if the ranges intersect (adjacency does not count)
    ///
    /// An empty range intersects a non-empty range that strictly surrounds its position, so an
    /// insertion site inside a deletion span still registers as a conflict.
    ///
    pub fn intersect_range(&self, other: &IntRange) -> bool {
        if self.is_empty() || other.is_empty() {
            let (point, range) = if self.is_empty() {
                (self, other)
            } else {
                (other, self)
            };
            point.start > range.start && point.start < range.end
        } else {
            other.end > self.start && other.start < self.end
        }
    }

    /// Return true if other is fully contained in this range (shared boundaries count)
    ///
    pub fn contains_range(&self, other: &IntRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Return true if this range ends at or before the start of other
    ///
    pub fn is_before(&self, other: &IntRange) -> bool {
        self.end <= other.start
    }

    pub fn merge(&mut self, other: &IntRange) {
        if other.start < self.start {
            self.start = other.start;
        }
        if other.end > self.end {
            self.end = other.end;
        }
    }
}

impl fmt::Debug for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}

/// Get the distance between 2 ranges
///
/// The distance is the gap between two ranges that don't intersect, and 0 if the ranges
/// intersect or are adjacent
///
pub fn get_int_range_distance(ir1: &IntRange, ir2: &IntRange) -> usize {
    use std::cmp::max;
    max(max(ir2.start - ir1.end, ir1.start - ir2.end), 0) as usize
}

#[allow(dead_code)]
pub fn get_overlap_range(r1: &IntRange, r2: &IntRange) -> Option<IntRange> {
    if !r1.intersect_range(r2) {
        return None;
    }
    Some(IntRange {
        start: std::cmp::max(r1.start, r2.start),
        end: std::cmp::min(r1.end, r2.end),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_int_range_distance() {
        let r1 = IntRange::from_pair(1, 4);
        let r2 = IntRange::from_pair(6, 8);
        let r3 = IntRange::from_pair(8, 9);

        assert_eq!(get_int_range_distance(&r1, &r2), 2);
        assert_eq!(get_int_range_distance(&r2, &r1), 2);
        assert_eq!(get_int_range_distance(&r2, &r3), 0);
        assert_eq!(get_int_range_distance(&r3, &r2), 0);
    }

    #[test]
    fn test_empty_range_intersect() {
        // Insertion site inside a deletion span conflicts
        let ins = IntRange::from_pair(5, 5);
        let del = IntRange::from_pair(3, 8);
        assert!(ins.intersect_range(&del));
        assert!(del.intersect_range(&ins));

        // Insertion site at a range boundary does not
        let edge = IntRange::from_pair(3, 3);
        assert!(!edge.intersect_range(&del));

        // Two insertion sites never intersect
        let ins2 = IntRange::from_pair(5, 5);
        assert!(!ins.intersect_range(&ins2));
    }

    #[test]
    fn test_contains_range() {
        let outer = IntRange::from_pair(2, 10);
        assert!(outer.contains_range(&IntRange::from_pair(2, 10)));
        assert!(outer.contains_range(&IntRange::from_pair(4, 4)));
        assert!(!outer.contains_range(&IntRange::from_pair(1, 5)));
    }
}

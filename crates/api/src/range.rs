//! Half-open ranges of execution points and sets of them.
//!
//! A [PointRange] is closed at the start and open at the end. That is, a
//! range `[begin, end)` where:
//! - `begin` is included in the range (inclusive bound)
//! - `end` is not included in the range (exclusive bound)
//!
//! Ranges that arrive closed at both ends (as the recording service
//! reports them) should be converted with [PointRange::inclusive].
//!
//! A [RangeList] is a sorted list of ranges that is kept maximally merged:
//! strictly increasing, with no two ranges overlapping or touching. It only
//! ever grows through [merge].

use crate::*;

/// A half-open range `[begin, end)` of execution points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointRange {
    begin: ExecutionPoint,
    end: ExecutionPoint,
}

impl PointRange {
    /// Construct a range, refusing bounds that are out of order.
    pub fn new(
        begin: ExecutionPoint,
        end: ExecutionPoint,
    ) -> ReplayResult<Self> {
        if begin > end {
            return Err(ReplayError::invariant(format!(
                "range begin {begin} is after end {end}"
            )));
        }
        Ok(Self { begin, end })
    }

    /// The range `[0, end)`.
    pub fn up_to(end: ExecutionPoint) -> Self {
        Self {
            begin: ExecutionPoint::zero(),
            end,
        }
    }

    /// Construct a half-open range from a range closed at both ends.
    pub fn inclusive(
        begin: ExecutionPoint,
        end_inclusive: ExecutionPoint,
    ) -> ReplayResult<Self> {
        Self::new(begin, end_inclusive.successor())
    }

    /// The inclusive start of the range.
    pub fn begin(&self) -> &ExecutionPoint {
        &self.begin
    }

    /// The exclusive end of the range.
    pub fn end(&self) -> &ExecutionPoint {
        &self.end
    }

    /// A range that contains no points.
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

impl std::fmt::Display for PointRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Determine whether `inner` lies entirely within `outer`.
pub fn contains(outer: &PointRange, inner: &PointRange) -> bool {
    outer.begin <= inner.begin && inner.end <= outer.end
}

/// Determine whether two ranges share at least one point.
///
/// Ranges that merely touch, where one ends where the other begins, do not
/// overlap.
pub fn overlaps(a: &PointRange, b: &PointRange) -> bool {
    a.begin < b.end && b.begin < a.end
}

/// Determine whether a point lies within a range.
pub fn is_in_range(point: &ExecutionPoint, range: &PointRange) -> bool {
    range.begin <= *point && *point < range.end
}

/// A sorted, maximally merged list of ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeList(Vec<PointRange>);

impl RangeList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from ranges in any order, merging as needed.
    pub fn from_ranges(ranges: impl IntoIterator<Item = PointRange>) -> Self {
        let mut ranges: Vec<PointRange> = ranges.into_iter().collect();
        ranges.sort_by(|a, b| a.begin.cmp(&b.begin));
        merge(&RangeList::new(), &RangeList(ranges))
    }

    /// Iterate the ranges in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, PointRange> {
        self.0.iter()
    }

    /// The number of disjoint ranges.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list covers no points.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any range in this list contains the point.
    pub fn contains_point(&self, point: &ExecutionPoint) -> bool {
        self.0.iter().any(|r| is_in_range(point, r))
    }

    /// Whether a single range of this list contains the whole of `range`.
    ///
    /// Because the list is maximally merged, coverage by several ranges is
    /// impossible for non-empty input.
    pub fn contains_range(&self, range: &PointRange) -> bool {
        range.is_empty() || self.0.iter().any(|r| contains(r, range))
    }

    /// Whether any range in this list overlaps `range`.
    pub fn overlaps_range(&self, range: &PointRange) -> bool {
        self.0.iter().any(|r| overlaps(r, range))
    }
}

impl<'a> IntoIterator for &'a RangeList {
    type Item = &'a PointRange;
    type IntoIter = std::slice::Iter<'a, PointRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Merge two range lists into one, coalescing overlapping or touching
/// ranges.
///
/// This is a single two-pointer sweep, linear in the combined length.
pub fn merge(a: &RangeList, b: &RangeList) -> RangeList {
    let mut out: Vec<PointRange> = Vec::with_capacity(a.len() + b.len());
    let mut a_iter = a.0.iter().peekable();
    let mut b_iter = b.0.iter().peekable();

    loop {
        let next = match (a_iter.peek(), b_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => a_iter.next(),
            (None, Some(_)) => b_iter.next(),
            (Some(x), Some(y)) => {
                if x.begin <= y.begin {
                    a_iter.next()
                } else {
                    b_iter.next()
                }
            }
        };
        let Some(next) = next else { break };

        if next.is_empty() {
            continue;
        }

        match out.last_mut() {
            Some(last) if last.end >= next.begin => {
                if next.end > last.end {
                    last.end = next.end.clone();
                }
            }
            _ => out.push(next.clone()),
        }
    }

    RangeList(out)
}

/// The sub-ranges of `requested` that are not covered by `covered`.
///
/// The result is minimal: every returned range lies within `requested`,
/// and every point of `requested` outside the result is in `covered`.
pub fn missing(requested: &PointRange, covered: &RangeList) -> RangeList {
    let mut out = Vec::new();
    let mut cursor = requested.begin.clone();

    for range in covered.iter() {
        if range.end <= cursor {
            continue;
        }
        if range.begin >= requested.end {
            break;
        }
        if range.begin > cursor {
            out.push(PointRange {
                begin: cursor,
                end: range.begin.clone(),
            });
        }
        cursor = range.end.clone();
        if cursor >= requested.end {
            break;
        }
    }

    if cursor < requested.end {
        out.push(PointRange {
            begin: cursor,
            end: requested.end.clone(),
        });
    }

    RangeList(out)
}

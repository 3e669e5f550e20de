//! Strictly increasing sequences of time points.
//!
//! A [`TimeSequence`] records when the entries of a time series happen, for
//! example samples supplied to a run or observations collected from one. It
//! stores whole [`TimePoint`]s only at the start of each *partition* and a
//! [`Duration`] offset for every entry. A new partition begins whenever an
//! appended point cannot be reached exactly by a duration from the current
//! partition start, so every entry reads back exactly.
//!
//! Entries are indexed from zero in append order; the index can be used to
//! look up associated values kept elsewhere.
//!
//! # Example
//!
//! ```rust
//! use jikoku::time::{Duration, TimePoint, TimeSequence};
//!
//! let mut ts = TimeSequence::new();
//! let mut t = TimePoint::new();
//! t.add_duration(Duration::micros(5)).unwrap();
//! ts.append(t.clone()).unwrap();
//! t.add_duration(Duration::femtos(72)).unwrap();
//! ts.append(t.clone()).unwrap();
//! t.add_duration(Duration::hours(1)).unwrap();
//! ts.append(t.clone()).unwrap();
//!
//! assert_eq!(ts.len(), 3);
//! assert_eq!(ts.back(), Some(t));
//! for (i, t) in ts.iter() {
//!     assert_eq!(ts.get(i), Some(t));
//! }
//! ```

use std::iter::FusedIterator;

use super::duration::Duration;
use super::time_point::TimePoint;
use super::{TimeError, TimeResult};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSequence {
    partitions: Vec<(usize, TimePoint)>,
    offsets: Vec<Duration>,
}

impl TimeSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Number of time points.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Appends `tp`, which must be later than every point already appended.
    pub fn append(&mut self, tp: TimePoint) -> TimeResult<()> {
        if let Some(last) = self.back() {
            if tp <= last {
                return Err(TimeError::OutOfRange(
                    "Time points must be appended in increasing order".to_string(),
                ));
            }
        }
        let offset = self.partitions.last().and_then(|(_, t0)| {
            let dt = tp.gap(t0);
            let exact = dt.finite() && t0.offset(dt).map_or(false, |t| t == tp);
            exact.then_some(dt)
        });
        if let Some(dt) = offset {
            self.offsets.push(dt);
        } else {
            self.start_partition(tp);
        }
        Ok(())
    }

    fn start_partition(&mut self, tp: TimePoint) {
        self.partitions.push((self.offsets.len(), tp));
        self.offsets.push(Duration::ZERO);
    }

    /// The time point at `index`.
    pub fn get(&self, index: usize) -> Option<TimePoint> {
        if index >= self.len() {
            return None;
        }
        self.point_in(self.partition_of(index), index)
    }

    pub fn front(&self) -> Option<TimePoint> {
        self.get(0)
    }

    pub fn back(&self) -> Option<TimePoint> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Index of the first point not earlier than `tp`, or `len()` if there
    /// is none.
    pub fn lower_bound(&self, tp: &TimePoint) -> usize {
        let p = self.partitions.partition_point(|(_, t)| t < tp);
        if let Some((start, t)) = self.partitions.get(p) {
            if t == tp {
                return *start;
            }
        }
        self.search_partition(p, |t| t < *tp)
    }

    /// Index of the first point later than `tp`, or `len()` if there is none.
    pub fn upper_bound(&self, tp: &TimePoint) -> usize {
        let p = self.partitions.partition_point(|(_, t)| t <= tp);
        self.search_partition(p, |t| t <= *tp)
    }

    /// Within the partition before `p`, whose start satisfies `before`, finds
    /// the first index that does not.
    fn search_partition(&self, p: usize, before: impl Fn(TimePoint) -> bool) -> usize {
        let Some(pi) = p.checked_sub(1) else {
            return 0;
        };
        let (start, t0) = &self.partitions[pi];
        let stop = self.partition_end(pi);
        let count = self.offsets[start + 1..stop]
            .partition_point(|dt| t0.offset(*dt).map_or(false, &before));
        start + 1 + count
    }

    /// Entries as `(index, time point)` pairs in increasing order.
    pub fn iter(&self) -> Iter<'_> {
        self.iter_from(0)
    }

    /// Entries from `index` onward, e.g. `iter_from(lower_bound(&t))`.
    pub fn iter_from(&self, index: usize) -> Iter<'_> {
        let front = index.min(self.len());
        Iter {
            seq: self,
            front,
            back: self.len(),
            partition: if front < self.len() { self.partition_of(front) } else { 0 },
        }
    }

    /// Partition start indices with their time points.
    pub fn partitions(&self) -> &[(usize, TimePoint)] {
        &self.partitions
    }

    fn partition_of(&self, index: usize) -> usize {
        self.partitions
            .partition_point(|(start, _)| *start <= index)
            .saturating_sub(1)
    }

    fn partition_end(&self, pi: usize) -> usize {
        self.partitions
            .get(pi + 1)
            .map_or(self.offsets.len(), |(start, _)| *start)
    }

    fn point_in(&self, pi: usize, index: usize) -> Option<TimePoint> {
        let (_, t0) = self.partitions.get(pi)?;
        t0.offset(*self.offsets.get(index)?).ok()
    }
}

/// Iterator over the entries of a [`TimeSequence`].
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    seq: &'a TimeSequence,
    front: usize,
    back: usize,
    partition: usize,
}

impl Iterator for Iter<'_> {
    type Item = (usize, TimePoint);

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let index = self.front;
        if self.seq.partition_end(self.partition) <= index {
            self.partition += 1;
        }
        self.front += 1;
        self.seq.point_in(self.partition, index).map(|t| (index, t))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        let index = self.back;
        self.seq.get(index).map(|t| (index, t))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl FusedIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a TimeSequence {
    type Item = (usize, TimePoint);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(dt: Duration) -> TimePoint {
        TimePoint::from_duration(dt).unwrap()
    }

    /// 5 us, 5 us + 72 fs, then one hour later: too far apart in scale for
    /// one partition.
    fn mixed_scales() -> (TimeSequence, Vec<TimePoint>) {
        let mut ts = TimeSequence::new();
        let mut points = Vec::new();
        let mut t = TimePoint::new();
        for dt in [Duration::micros(5), Duration::femtos(72), Duration::hours(1)] {
            t.add_duration(dt).unwrap();
            ts.append(t.clone()).unwrap();
            points.push(t.clone());
        }
        (ts, points)
    }

    #[test]
    fn test_empty_sequence() {
        let ts = TimeSequence::new();
        assert!(ts.is_empty());
        assert_eq!(ts.len(), 0);
        assert_eq!(ts.front(), None);
        assert_eq!(ts.back(), None);
        assert_eq!(ts.iter().count(), 0);
        assert_eq!(ts.lower_bound(&TimePoint::new()), 0);
        assert_eq!(ts.upper_bound(&TimePoint::new()), 0);
    }

    #[test]
    fn test_points_read_back_exactly() {
        let (ts, points) = mixed_scales();
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.partitions().len(), 2);
        assert_eq!(ts.partitions()[1].0, 2);
        for (i, t) in points.iter().enumerate() {
            assert_eq!(ts.get(i).as_ref(), Some(t));
        }
        assert_eq!(ts.get(3), None);
        assert_eq!(ts.front().as_ref(), points.first());
        assert_eq!(ts.back().as_ref(), points.last());
    }

    #[test]
    fn test_nearby_points_share_a_partition() {
        let mut ts = TimeSequence::new();
        for ms in [0, 250, 1000, 1750, 60_000] {
            ts.append(tp(Duration::millis(ms))).unwrap();
        }
        assert_eq!(ts.partitions().len(), 1);
        assert_eq!(ts.get(3), Some(tp(Duration::millis(1750))));
    }

    #[test]
    fn test_append_requires_increasing_points() {
        let mut ts = TimeSequence::new();
        ts.append(tp(Duration::seconds(2))).unwrap();
        assert!(matches!(
            ts.append(tp(Duration::seconds(2))),
            Err(TimeError::OutOfRange(_))
        ));
        assert!(ts.append(tp(Duration::seconds(1))).is_err());
        assert_eq!(ts.len(), 1);
    }

    #[test]
    fn test_iteration_both_ways() {
        let (ts, points) = mixed_scales();
        let forward: Vec<_> = ts.iter().collect();
        let expected: Vec<_> = points.iter().cloned().enumerate().collect();
        assert_eq!(forward, expected);

        let backward: Vec<usize> = ts.iter().rev().map(|(i, _)| i).collect();
        assert_eq!(backward, vec![2, 1, 0]);
        assert_eq!(ts.iter().len(), 3);

        let tail: Vec<usize> = (&ts).into_iter().skip(1).map(|(i, _)| i).collect();
        assert_eq!(tail, vec![1, 2]);
    }

    #[test]
    fn test_bounds() {
        let mut ts = TimeSequence::new();
        for s in [1, 3, 5] {
            ts.append(tp(Duration::seconds(s))).unwrap();
        }
        ts.append(tp(Duration::seconds(5) + Duration::femtos(1))).unwrap();
        ts.append(tp(Duration::years(40))).unwrap();
        assert_eq!(ts.partitions().len(), 3);

        assert_eq!(ts.lower_bound(&tp(Duration::ZERO)), 0);
        assert_eq!(ts.lower_bound(&tp(Duration::seconds(3))), 1);
        assert_eq!(ts.upper_bound(&tp(Duration::seconds(3))), 2);
        assert_eq!(ts.lower_bound(&tp(Duration::seconds(4))), 2);
        assert_eq!(ts.upper_bound(&tp(Duration::seconds(5))), 3);
        assert_eq!(ts.lower_bound(&tp(Duration::millis(5001))), 4);
        assert_eq!(ts.lower_bound(&tp(Duration::years(40))), 4);
        assert_eq!(ts.upper_bound(&tp(Duration::years(40))), 5);

        let from: Vec<usize> = ts
            .iter_from(ts.lower_bound(&tp(Duration::seconds(2))))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(from, vec![1, 2, 3, 4]);
    }
}

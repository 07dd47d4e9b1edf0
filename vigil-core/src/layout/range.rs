//! A sorted map from layer ranges to states.
//!
//! Layout tracking addresses layers in ranges (`base..base+count`), and in
//! practice long runs of layers share one state, so states are kept as a
//! list of non-overlapping, ascending `(Range, value)` entries rather than
//! one entry per layer.

use smallvec::SmallVec;
use std::{mem, ops::Range};

#[derive(Clone, Debug, PartialEq)]
pub struct RangeList<T> {
    /// Non-overlapping entries in ascending key order. Gaps are allowed
    /// and mean "no state recorded".
    entries: SmallVec<[(Range<u32>, T); 2]>,
}

impl<T: Copy + PartialEq> RangeList<T> {
    pub fn empty() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    pub fn filled(span: Range<u32>, value: T) -> Self {
        Self {
            entries: std::iter::once((span, value)).collect(),
        }
    }

    #[cfg(test)]
    fn from_slice(entries: &[(Range<u32>, T)]) -> Self {
        Self {
            entries: entries.iter().cloned().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Range<u32>, T)> {
        self.entries.iter()
    }

    /// If every entry intersecting `span` maps to one common value under
    /// `fun`, return it. `None` means no intersection at all; `Some(Err)`
    /// means the intersected values disagree. Gaps are not detected.
    pub fn query<U: PartialEq>(
        &self,
        span: &Range<u32>,
        fun: impl Fn(&T) -> U,
    ) -> Option<Result<U, ()>> {
        let mut result = None;
        for &(ref range, ref value) in self.entries.iter() {
            if range.end > span.start && range.start < span.end {
                let prev = result.replace(fun(value));
                if prev.is_some() && prev != result {
                    return Some(Err(()));
                }
            }
        }
        result.map(Ok)
    }

    /// Split entries so that a run of them covers exactly `span`, filling
    /// gaps with `default`, and return that run mutably.
    pub fn isolate(&mut self, span: &Range<u32>, default: T) -> &mut [(Range<u32>, T)] {
        let old = mem::take(&mut self.entries);
        let mut rebuilt: SmallVec<[(Range<u32>, T); 2]> = SmallVec::new();
        let mut inside: SmallVec<[(Range<u32>, T); 2]> = SmallVec::new();
        let mut after: SmallVec<[(Range<u32>, T); 2]> = SmallVec::new();

        for (range, value) in old {
            if range.end <= span.start {
                rebuilt.push((range, value));
                continue;
            }
            if range.start >= span.end {
                after.push((range, value));
                continue;
            }
            if range.start < span.start {
                rebuilt.push((range.start..span.start, value));
            }
            inside.push((range.start.max(span.start)..range.end.min(span.end), value));
            if range.end > span.end {
                after.push((span.end..range.end, value));
            }
        }

        let lo = rebuilt.len();
        let mut cursor = span.start;
        for (range, value) in inside {
            if range.start > cursor {
                rebuilt.push((cursor..range.start, default));
            }
            cursor = range.end;
            rebuilt.push((range, value));
        }
        if cursor < span.end {
            rebuilt.push((cursor..span.end, default));
        }
        let hi = rebuilt.len();
        rebuilt.extend(after);

        self.entries = rebuilt;
        &mut self.entries[lo..hi]
    }

    /// Merge neighboring entries holding equal values.
    pub fn coalesce(&mut self) {
        let mut index = 1;
        while index < self.entries.len() {
            let (left, right) = self.entries.split_at_mut(index);
            let prev = left.last_mut().unwrap();
            let next = &right[0];
            if prev.0.end == next.0.start && prev.1 == next.1 {
                prev.0.end = next.0.end;
                self.entries.remove(index);
            } else {
                index += 1;
            }
        }
    }
}

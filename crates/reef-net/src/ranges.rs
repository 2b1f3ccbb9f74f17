//! Set of block indices stored as disjoint half-open runs.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RangeSet {
    /// start -> end, non-overlapping and non-adjacent.
    runs: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub(crate) fn insert(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let (mut start, mut end) = (start, end);
        // Absorb a run that starts before and reaches `start`.
        if let Some((&s, &e)) = self.runs.range(..=start).next_back()
            && e >= start
        {
            start = s;
            end = end.max(e);
            self.runs.remove(&s);
        }
        // Absorb runs starting inside [start, end].
        while let Some((&s, &e)) = self.runs.range(start..=end).next() {
            end = end.max(e);
            self.runs.remove(&s);
        }
        self.runs.insert(start, end);
    }

    pub(crate) fn contains(&self, index: u64) -> bool {
        self.runs
            .range(..=index)
            .next_back()
            .is_some_and(|(_, &end)| index < end)
    }

    pub(crate) fn remove(&mut self, index: u64) {
        let Some((&start, &end)) = self.runs.range(..=index).next_back() else {
            return;
        };
        if index >= end {
            return;
        }
        self.runs.remove(&start);
        if start < index {
            self.runs.insert(start, index);
        }
        if index + 1 < end {
            self.runs.insert(index + 1, end);
        }
    }
}

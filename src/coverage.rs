use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSet {
    ranges: BTreeMap<usize, usize>,
}

impl CoverageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, lo: usize, hi: usize) {
        if hi < lo {
            return;
        }
        let mut lo = lo;
        let mut hi = hi;

        // Absorb a range that starts before `lo` and touches it.
        if let Some((&start, &end)) = self.ranges.range(..=lo).next_back() {
            if end.saturating_add(1) >= lo {
                lo = start;
                hi = hi.max(end);
            }
        }

        let absorbed: Vec<usize> = self
            .ranges
            .range(lo..=hi.saturating_add(1))
            .map(|(&start, _)| start)
            .collect();
        for start in absorbed {
            if let Some(end) = self.ranges.remove(&start) {
                hi = hi.max(end);
            }
        }
        self.ranges.insert(lo, hi);
    }

    pub fn covering(&self, index: usize) -> Option<(usize, usize)> {
        let (&lo, &hi) = self.ranges.range(..=index).next_back()?;
        (index <= hi).then_some((lo, hi))
    }

    pub fn contains(&self, index: usize) -> bool {
        self.covering(index).is_some()
    }

    pub fn gap_around(&self, index: usize, len: usize) -> Option<(usize, usize)> {
        if index >= len || self.contains(index) {
            return None;
        }
        let lo = self
            .ranges
            .range(..index)
            .next_back()
            .map(|(_, &hi)| hi + 1)
            .unwrap_or(0);
        let hi = self
            .ranges
            .range(index..)
            .next()
            .map(|(&start, _)| start - 1)
            .unwrap_or(len - 1);
        Some((lo, hi.min(len - 1)))
    }

    pub fn fill_offset(&self, index: usize, len: usize, limit: usize) -> Option<usize> {
        let (lo, _) = self.gap_around(index, len)?;
        Some(index.saturating_sub(limit / 2).max(lo))
    }

    pub fn ranges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.ranges.iter().map(|(&lo, &hi)| (lo, hi))
    }
}

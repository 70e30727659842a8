//! Free-space tracker.
//!
//! Holds the volume's free cluster ranges ordered by LCN. Ranges never
//! overlap; they are coalesced on insertion. Clusters vacated by a move are
//! parked in a separate temporary list until the next release, because the
//! file system may not hand them out again before its next checkpoint.

use std::collections::BTreeMap;
use tracing::trace;

use crate::volume::Extent;

#[derive(Debug, Clone, Default)]
pub struct FreeSpace {
    regions: BTreeMap<u64, u64>,
    temporary: Vec<Extent>,
}

impl FreeSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from `(lcn, length)` pairs in any order.
    pub fn from_regions<I>(regions: I) -> Self
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        let mut fs = Self::new();
        for (lcn, length) in regions {
            fs.insert(lcn, length);
        }
        fs
    }

    /// Replace the whole layout (fresh read from the volume) and drop temporary space.
    pub fn reload<I>(&mut self, regions: I)
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        *self = Self::from_regions(regions);
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn count(&self) -> usize {
        self.regions.len()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Extent> + '_ {
        self.regions.iter().map(|(&lcn, &len)| Extent::new(lcn, len))
    }

    pub fn total_free(&self) -> u64 {
        self.regions.values().sum()
    }

    pub fn total_temporary(&self) -> u64 {
        self.temporary.iter().map(|e| e.length).sum()
    }

    /// Free clusters plus clusters waiting in temporary space.
    pub fn accounted_clusters(&self) -> u64 {
        self.total_free() + self.total_temporary()
    }

    /// First region starting at or after `lcn` with at least `min_length`
    /// clusters (any nonzero length when `min_length` is `None`).
    pub fn find_first_free_on_or_after(&self, lcn: u64, min_length: Option<u64>) -> Option<Extent> {
        let need = min_length.unwrap_or(1).max(1);
        self.regions
            .range(lcn..)
            .find(|(_, len)| **len >= need)
            .map(|(&lcn, &len)| Extent::new(lcn, len))
    }

    /// Region closest to the end of the volume that does not intersect the
    /// inclusive range `[reserved_start, reserved_end]`.
    pub fn find_last_usable(&self, reserved_start: u64, reserved_end: u64) -> Option<Extent> {
        self.regions
            .iter()
            .rev()
            .find(|(lcn, len)| **len > 0 && (**lcn > reserved_end || **lcn + **len <= reserved_start))
            .map(|(&lcn, &len)| Extent::new(lcn, len))
    }

    /// Last region holding at least `min_length` clusters.
    pub fn find_last_fitting(&self, min_length: u64) -> Option<Extent> {
        self.regions
            .iter()
            .rev()
            .find(|(_, len)| **len >= min_length.max(1))
            .map(|(&lcn, &len)| Extent::new(lcn, len))
    }

    /// Remove `[lcn, lcn + length)` from free space, shrinking or splitting
    /// regions. Parked temporary clusters in the range are claimed as well.
    pub fn subtract(&mut self, lcn: u64, length: u64) {
        if length == 0 {
            return;
        }
        self.remove_regions(lcn, length);
        let cut = [Extent::new(lcn, length)];
        if self.temporary.iter().any(|t| t.lcn < lcn + length && t.end() > lcn) {
            self.temporary = crate::files::lcn_difference(&self.temporary, &cut);
        }
        trace!(lcn, length, "free space subtracted");
    }

    fn remove_regions(&mut self, lcn: u64, length: u64) {
        let end = lcn.saturating_add(length);
        let start_key = self
            .regions
            .range(..=lcn)
            .next_back()
            .map(|(&k, _)| k)
            .unwrap_or(lcn);
        let hit: Vec<(u64, u64)> = self
            .regions
            .range(start_key..end)
            .map(|(&k, &v)| (k, v))
            .filter(|&(k, v)| k + v > lcn)
            .collect();
        for (k, v) in hit {
            self.regions.remove(&k);
            if k < lcn {
                self.regions.insert(k, lcn - k);
            }
            if k + v > end {
                self.regions.insert(end, k + v - end);
            }
        }
    }

    /// Add `[lcn, lcn + length)` to free space, merging with neighbours.
    pub fn insert(&mut self, lcn: u64, length: u64) {
        if length == 0 {
            return;
        }
        // keep ranges disjoint even if the caller re-adds known free space
        self.remove_regions(lcn, length);
        let mut start = lcn;
        let mut end = lcn + length;
        if let Some((&k, &v)) = self.regions.range(..start).next_back() {
            if k + v == start {
                self.regions.remove(&k);
                start = k;
            }
        }
        if let Some(&v) = self.regions.get(&end) {
            self.regions.remove(&end);
            end += v;
        }
        self.regions.insert(start, end - start);
    }

    /// Park clusters vacated by a move until the next release.
    pub fn add_temporary(&mut self, lcn: u64, length: u64) {
        if length > 0 {
            self.temporary.push(Extent::new(lcn, length));
        }
    }

    /// Re-admit temporarily parked clusters into free space.
    pub fn release_temporary(&mut self) {
        for ext in std::mem::take(&mut self.temporary) {
            self.insert(ext.lcn, ext.length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(fs: &FreeSpace) -> Vec<(u64, u64)> {
        fs.iter().map(|e| (e.lcn, e.length)).collect()
    }

    #[test]
    fn insert_coalesces_neighbours() {
        let mut fs = FreeSpace::from_regions([(0, 10), (20, 10)]);
        fs.insert(10, 10);
        assert_eq!(layout(&fs), vec![(0, 30)]);
    }

    #[test]
    fn subtract_splits_region() {
        let mut fs = FreeSpace::from_regions([(100, 50)]);
        fs.subtract(110, 10);
        assert_eq!(layout(&fs), vec![(100, 10), (120, 30)]);
        fs.subtract(90, 15);
        assert_eq!(layout(&fs), vec![(105, 5), (120, 30)]);
        fs.subtract(140, 100);
        assert_eq!(layout(&fs), vec![(105, 5), (120, 20)]);
    }

    #[test]
    fn subtract_spanning_several_regions() {
        let mut fs = FreeSpace::from_regions([(0, 5), (10, 5), (20, 5)]);
        fs.subtract(3, 20);
        assert_eq!(layout(&fs), vec![(0, 3), (23, 2)]);
    }

    #[test]
    fn first_free_respects_start_and_length() {
        let fs = FreeSpace::from_regions([(10, 2), (50, 8), (90, 30)]);
        assert_eq!(fs.find_first_free_on_or_after(0, None), Some(Extent::new(10, 2)));
        assert_eq!(fs.find_first_free_on_or_after(11, None), Some(Extent::new(50, 8)));
        assert_eq!(fs.find_first_free_on_or_after(0, Some(10)), Some(Extent::new(90, 30)));
        assert_eq!(fs.find_first_free_on_or_after(91, None), None);
    }

    #[test]
    fn last_usable_skips_reserved_range() {
        let fs = FreeSpace::from_regions([(10, 5), (40, 10), (95, 5)]);
        assert_eq!(fs.find_last_usable(0, 20), Some(Extent::new(95, 5)));
        assert_eq!(fs.find_last_usable(90, 99), Some(Extent::new(40, 10)));
        // a region straddling the reserved range is not usable
        assert_eq!(fs.find_last_usable(45, 99), Some(Extent::new(10, 5)));
        assert_eq!(fs.find_last_usable(0, 200), None);
    }

    #[test]
    fn temporary_space_is_invisible_until_released() {
        let mut fs = FreeSpace::from_regions([(0, 10)]);
        fs.add_temporary(10, 5);
        assert_eq!(fs.total_free(), 10);
        assert_eq!(fs.accounted_clusters(), 15);
        fs.release_temporary();
        assert_eq!(layout(&fs), vec![(0, 15)]);
        assert_eq!(fs.total_temporary(), 0);
    }

    #[test]
    fn subtract_claims_parked_clusters() {
        let mut fs = FreeSpace::from_regions([(0, 10)]);
        fs.add_temporary(20, 10);
        fs.subtract(25, 10);
        assert_eq!(fs.total_temporary(), 5);
        fs.release_temporary();
        assert_eq!(layout(&fs), vec![(0, 10), (20, 5)]);
    }
}

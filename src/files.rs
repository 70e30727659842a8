//! File records and their cluster maps.
//!
//! A `BlockMap` holds a file's extents in VCN order. Blocks are contiguous in
//! VCN space; the last block has no successor, which is how traversals detect
//! the end of the map (the ring closes back on the first block).
//!
//! Files live in a `FileTable` arena and are referred to by `FileId`, which
//! stays valid for the whole job.

use bitflags::bitflags;
use std::ops::{Index, IndexMut};

use crate::volume::Extent;

/// One extent of a file: `length` clusters starting at `vcn` inside the file
/// and at `lcn` on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Block {
    pub vcn: u64,
    pub lcn: u64,
    pub length: u64,
}

impl Block {
    pub fn new(vcn: u64, lcn: u64, length: u64) -> Self {
        Self { vcn, lcn, length }
    }

    pub fn end_vcn(&self) -> u64 {
        self.vcn + self.length
    }

    pub fn end_lcn(&self) -> u64 {
        self.lcn + self.length
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.lcn, self.length)
    }
}

/// Ordered extents of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    blocks: Vec<Block>,
}

impl BlockMap {
    pub fn new(mut blocks: Vec<Block>) -> Self {
        blocks.retain(|b| b.length > 0);
        blocks.sort_by_key(|b| b.vcn);
        Self { blocks }
    }

    /// Build a map from `(lcn, length)` pairs laid out back to back in VCN space.
    pub fn from_extents(extents: &[(u64, u64)]) -> Self {
        let mut vcn = 0;
        let blocks = extents
            .iter()
            .map(|&(lcn, length)| {
                let b = Block::new(vcn, lcn, length);
                vcn += length;
                b
            })
            .collect();
        Self::new(blocks)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn first(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn clusters(&self) -> u64 {
        self.blocks.iter().map(|b| b.length).sum()
    }

    pub fn fragments(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Index of the block following `index`, or `None` once the ring would wrap.
    pub fn successor(&self, index: usize) -> Option<usize> {
        let next = index + 1;
        (next < self.blocks.len()).then_some(next)
    }

    /// Index of the block holding `vcn`.
    pub fn position_of_vcn(&self, vcn: u64) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| vcn >= b.vcn && vcn < b.end_vcn())
    }

    pub fn extents(&self) -> impl Iterator<Item = Extent> + '_ {
        self.blocks.iter().map(Block::extent)
    }

    /// True when blocks follow each other in VCN space without gaps or overlaps.
    pub fn is_contiguous(&self) -> bool {
        self.blocks
            .windows(2)
            .all(|w| w[0].end_vcn() == w[1].vcn)
    }

    /// Physically contiguous runs: consecutive blocks where the next one starts
    /// right behind the previous one on disk.
    pub fn runs(&self) -> Vec<Extent> {
        let mut runs: Vec<Extent> = Vec::new();
        let mut prev: Option<&Block> = None;
        for block in &self.blocks {
            match (prev, runs.last_mut()) {
                (Some(p), Some(run)) if block.lcn == p.end_lcn() => run.length += block.length,
                _ => runs.push(block.extent()),
            }
            prev = Some(block);
        }
        runs
    }

    /// The run containing `lcn`.
    pub fn run_containing(&self, lcn: u64) -> Option<Extent> {
        self.runs().into_iter().find(|r| r.contains(lcn))
    }

    /// Split `[start_vcn, start_vcn + length)` into pieces that each lie in one block.
    /// Returns `(vcn, extent)` pairs, or `None` when the range leaves the file.
    pub fn segments(&self, start_vcn: u64, length: u64) -> Option<Vec<(u64, Extent)>> {
        let end_vcn = start_vcn.checked_add(length)?;
        let mut out = Vec::new();
        let mut vcn = start_vcn;
        while vcn < end_vcn {
            let idx = self.position_of_vcn(vcn)?;
            let block = &self.blocks[idx];
            let offset = vcn - block.vcn;
            let n = (block.length - offset).min(end_vcn - vcn);
            out.push((vcn, Extent::new(block.lcn + offset, n)));
            vcn += n;
        }
        Some(out)
    }

    /// The map expected after moving `[start_vcn, start_vcn + length)` to `target_lcn`.
    pub fn relocate(&self, start_vcn: u64, length: u64, target_lcn: u64) -> Option<BlockMap> {
        let end_vcn = start_vcn.checked_add(length)?;
        if length == 0 || self.segments(start_vcn, length).is_none() {
            return None;
        }
        let mut blocks = Vec::with_capacity(self.blocks.len() + 2);
        for b in &self.blocks {
            if b.end_vcn() <= start_vcn || b.vcn >= end_vcn {
                blocks.push(*b);
                continue;
            }
            if b.vcn < start_vcn {
                blocks.push(Block::new(b.vcn, b.lcn, start_vcn - b.vcn));
            }
            let lo = b.vcn.max(start_vcn);
            let hi = b.end_vcn().min(end_vcn);
            blocks.push(Block::new(lo, target_lcn + (lo - start_vcn), hi - lo));
            if b.end_vcn() > end_vcn {
                blocks.push(Block::new(end_vcn, b.lcn + (end_vcn - b.vcn), b.end_vcn() - end_vcn));
            }
        }
        blocks.sort_by_key(|b| b.vcn);
        Some(BlockMap::new(coalesce(blocks)))
    }
}

/// Merge neighbours that are contiguous in both VCN and LCN space.
fn coalesce(blocks: Vec<Block>) -> Vec<Block> {
    let mut out: Vec<Block> = Vec::with_capacity(blocks.len());
    for b in blocks {
        match out.last_mut() {
            Some(last) if last.end_vcn() == b.vcn && last.end_lcn() == b.lcn => {
                last.length += b.length
            }
            _ => out.push(b),
        }
    }
    out
}

/// Clusters covered by `a` but not by `b`.
pub fn lcn_difference(a: &[Extent], b: &[Extent]) -> Vec<Extent> {
    let mut out = Vec::new();
    for ext in a {
        let mut pieces = vec![*ext];
        for cut in b {
            pieces = pieces
                .into_iter()
                .flat_map(|p| {
                    if cut.end() <= p.lcn || cut.lcn >= p.end() {
                        return vec![p];
                    }
                    let mut rest = Vec::with_capacity(2);
                    if cut.lcn > p.lcn {
                        rest.push(Extent::new(p.lcn, cut.lcn - p.lcn));
                    }
                    if cut.end() < p.end() {
                        rest.push(Extent::new(cut.end(), p.end() - cut.end()));
                    }
                    rest
                })
                .collect();
        }
        out.extend(pieces);
    }
    out
}

bitflags! {
    /// Attributes reported by the host for a file system entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        const DIRECTORY = 0x0001;
        const COMPRESSED = 0x0002;
        const REPARSE_POINT = 0x0004;
        const TEMPORARY = 0x0008;
        const SPARSE = 0x0010;
    }
}

bitflags! {
    /// Annotations attached by the analyzer, planner and optimizer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileFlags: u32 {
        const EXCLUDED = 0x0001;
        const OVER_LIMIT = 0x0002;
        const LOCKED = 0x0004;
        const NOT_LOCKED = 0x0008;
        const MOVED_TO_FRONT = 0x0010;
        const CURRENTLY_EXCLUDED = 0x0020;
        const REGION_NOT_FOUND = 0x0040;
        const FRAGMENTED_BY_FILE_OPT = 0x0080;
        const MOVING_FAILED = 0x0100;
    }
}

/// One file system entry together with its cluster map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub attributes: FileAttributes,
    pub creation_time: i64,
    pub modification_time: i64,
    pub access_time: i64,
    pub blockmap: BlockMap,
    pub flags: FileFlags,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, blockmap: BlockMap) -> Self {
        let path = path.into();
        let name = path.rsplit('\\').next().unwrap_or_default().to_string();
        Self {
            path,
            name,
            blockmap,
            ..Default::default()
        }
    }

    pub fn clusters(&self) -> u64 {
        self.blockmap.clusters()
    }

    pub fn fragments(&self) -> u64 {
        self.blockmap.fragments()
    }

    pub fn is_fragmented(&self) -> bool {
        self.blockmap.len() > 1
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn is_compressed(&self) -> bool {
        self.attributes.contains(FileAttributes::COMPRESSED)
    }

    pub fn is_temporary(&self) -> bool {
        self.attributes.contains(FileAttributes::TEMPORARY)
    }

    pub fn is_excluded(&self) -> bool {
        self.flags.contains(FileFlags::EXCLUDED)
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(FileFlags::LOCKED)
    }

    pub fn first_lcn(&self) -> Option<u64> {
        self.blockmap.first().map(|b| b.lcn)
    }
}

/// Stable handle of a file inside a `FileTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub usize);

/// Arena of the files found by one analysis pass.
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    files: Vec<FileRecord>,
}

impl FileTable {
    pub fn new(files: Vec<FileRecord>) -> Self {
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FileId> + use<> {
        (0..self.files.len()).map(FileId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileId, &FileRecord)> {
        self.files.iter().enumerate().map(|(i, f)| (FileId(i), f))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileRecord> {
        self.files.iter_mut()
    }

    pub fn find_by_path(&self, path: &str) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.path.eq_ignore_ascii_case(path))
            .map(FileId)
    }

    /// Clear a flag on every file.
    pub fn clear_flag(&mut self, flag: FileFlags) {
        for f in &mut self.files {
            f.flags.remove(flag);
        }
    }
}

impl Index<FileId> for FileTable {
    type Output = FileRecord;

    fn index(&self, id: FileId) -> &FileRecord {
        &self.files[id.0]
    }
}

impl IndexMut<FileId> for FileTable {
    fn index_mut(&mut self, id: FileId) -> &mut FileRecord {
        &mut self.files[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_join_physically_adjacent_blocks() {
        let map = BlockMap::new(vec![
            Block::new(0, 100, 10),
            Block::new(10, 110, 5),
            Block::new(15, 300, 5),
        ]);
        assert_eq!(map.runs(), vec![Extent::new(100, 15), Extent::new(300, 5)]);
        assert!(map.is_contiguous());
    }

    #[test]
    fn successor_stops_at_the_end_of_the_ring() {
        let map = BlockMap::from_extents(&[(10, 1), (20, 1)]);
        assert_eq!(map.successor(0), Some(1));
        assert_eq!(map.successor(1), None);
    }

    #[test]
    fn relocate_merges_into_single_block() {
        let map = BlockMap::from_extents(&[(100, 10), (500, 10)]);
        let moved = map.relocate(10, 10, 110).unwrap();
        assert_eq!(moved.blocks(), &[Block::new(0, 100, 20)]);
    }

    #[test]
    fn relocate_splits_partial_block() {
        let map = BlockMap::from_extents(&[(100, 10)]);
        let moved = map.relocate(3, 4, 900).unwrap();
        assert_eq!(
            moved.blocks(),
            &[
                Block::new(0, 100, 3),
                Block::new(3, 900, 4),
                Block::new(7, 107, 3)
            ]
        );
        assert_eq!(moved.clusters(), 10);
        assert!(moved.is_contiguous());
    }

    #[test]
    fn relocate_rejects_ranges_outside_the_file() {
        let map = BlockMap::from_extents(&[(100, 10)]);
        assert!(map.relocate(8, 5, 900).is_none());
        assert!(map.relocate(0, 0, 900).is_none());
    }

    #[test]
    fn segments_follow_block_boundaries() {
        let map = BlockMap::from_extents(&[(100, 4), (200, 4)]);
        let segs = map.segments(2, 4).unwrap();
        assert_eq!(
            segs,
            vec![(2, Extent::new(102, 2)), (4, Extent::new(200, 2))]
        );
    }

    #[test]
    fn difference_cuts_overlaps() {
        let a = [Extent::new(0, 10), Extent::new(20, 5)];
        let b = [Extent::new(3, 2), Extent::new(22, 10)];
        assert_eq!(
            lcn_difference(&a, &b),
            vec![Extent::new(0, 3), Extent::new(5, 5), Extent::new(20, 2)]
        );
    }

    #[test]
    fn name_is_last_path_component() {
        let f = FileRecord::new("C:\\dir\\file.txt", BlockMap::default());
        assert_eq!(f.name, "file.txt");
    }
}

//! LCN-ordered index of every file block on the volume.
//! Lets the planner answer "which block comes first at or after LCN x"
//! without walking every file.

use std::collections::BTreeMap;

use crate::files::{BlockMap, FileId};

/// One indexed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub file: FileId,
    pub vcn: u64,
    pub lcn: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    blocks: BTreeMap<(u64, FileId), BlockRef>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn add_file(&mut self, file: FileId, map: &BlockMap) {
        for b in map.blocks() {
            self.blocks.insert(
                (b.lcn, file),
                BlockRef {
                    file,
                    vcn: b.vcn,
                    lcn: b.lcn,
                    length: b.length,
                },
            );
        }
    }

    pub fn remove_file(&mut self, file: FileId, map: &BlockMap) {
        for b in map.blocks() {
            self.blocks.remove(&(b.lcn, file));
        }
    }

    /// Blocks starting at or after `lcn`, in LCN order.
    pub fn from_lcn(&self, lcn: u64) -> impl Iterator<Item = BlockRef> + '_ {
        self.blocks
            .range((lcn, FileId(0))..)
            .map(|(_, b)| *b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_follows_lcn_order_across_files() {
        let mut idx = BlockIndex::new();
        let a = BlockMap::from_extents(&[(500, 10), (100, 10)]);
        let b = BlockMap::from_extents(&[(200, 5)]);
        idx.add_file(FileId(0), &a);
        idx.add_file(FileId(1), &b);

        let order: Vec<u64> = idx.from_lcn(0).map(|r| r.lcn).collect();
        assert_eq!(order, vec![100, 200, 500]);

        let first = idx.from_lcn(150).next().unwrap();
        assert_eq!((first.file, first.lcn), (FileId(1), 200));

        idx.remove_file(FileId(0), &a);
        assert_eq!(idx.len(), 1);
    }
}

//! Fragmented-file index.
//! Orders files by fragment count (descending), then by path
//! (case-insensitive). Membership is rebuilt once per analysis and adjusted
//! as moves change fragment counts.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use crate::files::{FileId, FileRecord};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FragKey {
    fragments: Reverse<u64>,
    path: String,
    file: FileId,
}

impl FragKey {
    fn of(id: FileId, f: &FileRecord) -> Self {
        Self {
            fragments: Reverse(f.fragments()),
            path: f.path.to_lowercase(),
            file: id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FragmentedIndex {
    order: BTreeSet<FragKey>,
    keys: HashMap<FileId, FragKey>,
}

impl FragmentedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Insert or re-key a file. Returns true if it was not present before.
    pub fn insert(&mut self, id: FileId, f: &FileRecord) -> bool {
        let key = FragKey::of(id, f);
        let fresh = match self.keys.insert(id, key.clone()) {
            Some(old) => {
                self.order.remove(&old);
                false
            }
            None => true,
        };
        self.order.insert(key);
        fresh
    }

    pub fn remove(&mut self, id: FileId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => self.order.remove(&key),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = FileId> + '_ {
        self.order.iter().map(|k| k.file)
    }

    pub fn cursor(&self) -> FragCursor {
        FragCursor::default()
    }
}

/// Position inside a `FragmentedIndex` that survives removal of the current
/// element: the next call resumes strictly after the last key handed out.
#[derive(Debug, Clone, Default)]
pub struct FragCursor {
    last: Option<FragKey>,
}

impl FragCursor {
    pub fn next(&mut self, index: &FragmentedIndex) -> Option<FileId> {
        let next = match &self.last {
            None => index.order.iter().next(),
            Some(last) => index
                .order
                .range((Bound::Excluded(last.clone()), Bound::Unbounded))
                .next(),
        }
        .cloned();
        let id = next.as_ref().map(|k| k.file);
        if next.is_some() {
            self.last = next;
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::BlockMap;

    fn file(path: &str, fragments: u64) -> FileRecord {
        let extents: Vec<(u64, u64)> = (0..fragments).map(|i| (i * 10, 1)).collect();
        FileRecord::new(path, BlockMap::from_extents(&extents))
    }

    #[test]
    fn orders_by_fragments_then_path() {
        let mut idx = FragmentedIndex::new();
        idx.insert(FileId(0), &file("C:\\b", 3));
        idx.insert(FileId(1), &file("C:\\A", 3));
        idx.insert(FileId(2), &file("C:\\z", 7));
        let order: Vec<FileId> = idx.iter().collect();
        assert_eq!(order, vec![FileId(2), FileId(1), FileId(0)]);
    }

    #[test]
    fn cursor_tolerates_removal_of_current() {
        let mut idx = FragmentedIndex::new();
        for (i, n) in [5u64, 4, 3, 2].iter().enumerate() {
            idx.insert(FileId(i), &file(&format!("C:\\f{i}"), *n));
        }
        let mut cur = idx.cursor();
        let mut seen = Vec::new();
        while let Some(id) = cur.next(&idx) {
            seen.push(id);
            idx.remove(id);
        }
        assert_eq!(seen, vec![FileId(0), FileId(1), FileId(2), FileId(3)]);
        assert!(idx.is_empty());
    }

    #[test]
    fn reinsert_updates_key() {
        let mut idx = FragmentedIndex::new();
        assert!(idx.insert(FileId(0), &file("C:\\a", 2)));
        assert!(!idx.insert(FileId(0), &file("C:\\a", 9)));
        assert_eq!(idx.len(), 1);
        assert!(idx.remove(FileId(0)));
        assert!(!idx.contains(FileId(0)));
    }
}

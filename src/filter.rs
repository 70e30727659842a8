//! Per-entry analysis filter and wildcard path patterns.
//!
//! The filter never drops ordinary files: excluded entries stay in the file
//! list with `FileFlags::EXCLUDED` set so they can still be reported. Only
//! entries without a path are dropped, together with everything below them.

use tracing::{debug, trace};

use crate::config::JobOptions;
use crate::files::{FileFlags, FileRecord};
use crate::platform::WalkDecision;

/// Shortest path that can name anything on a volume (`X:\`).
pub(crate) const MIN_PATH_LEN: usize = 3;

/// Case-insensitive match supporting `*` (any run) and `?` (any one char).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// A `;`-separated list of wildcard patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternList {
    patterns: Vec<String>,
}

impl PatternList {
    pub fn parse(s: &str) -> Self {
        if s.trim().is_empty() {
            return Self::default();
        }
        Self {
            patterns: s.split(';').map(|p| p.trim().to_string()).collect(),
        }
    }

    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.patterns.first().map(String::as_str)
    }

    pub fn has_empty_pattern(&self) -> bool {
        self.patterns.iter().any(|p| p.is_empty())
    }

    /// True when any pattern matches `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| wildcard_match(p, path))
    }
}

/// Exclusion rules evaluated for every enumerated entry.
#[derive(Debug, Clone, Copy)]
pub struct FileFilter<'a> {
    options: &'a JobOptions,
    bytes_per_cluster: u64,
}

impl<'a> FileFilter<'a> {
    pub fn new(options: &'a JobOptions, bytes_per_cluster: u64) -> Self {
        Self {
            options,
            bytes_per_cluster,
        }
    }

    /// Classify one entry. Sets or clears `EXCLUDED` and `OVER_LIMIT`.
    pub fn apply(&self, f: &mut FileRecord) -> WalkDecision {
        f.flags.remove(FileFlags::EXCLUDED | FileFlags::OVER_LIMIT);

        if f.path.is_empty() {
            f.flags.insert(FileFlags::EXCLUDED);
            return WalkDecision::SkipSubtree;
        }
        if f.path.ends_with("\\.") {
            trace!(path = %f.path, "root directory detected, trailing dot removed");
            f.path.pop();
        }

        if self.is_excluded(f) {
            f.flags.insert(FileFlags::EXCLUDED);
        }
        WalkDecision::Keep
    }

    fn is_excluded(&self, f: &mut FileRecord) -> bool {
        // resident streams and entries without a map are counted but not filtered further
        if f.blockmap.is_empty() {
            return true;
        }
        if f.is_temporary() {
            return true;
        }
        self.exclude_by_size(f)
            || self.exclude_by_fragments(f)
            || self.exclude_by_fragment_size(f)
            || self.exclude_by_path(f)
    }

    fn exclude_by_size(&self, f: &mut FileRecord) -> bool {
        let Some(limit) = self.options.size_limit else {
            return false;
        };
        let size = f.clusters().saturating_mul(self.bytes_per_cluster);
        if size > limit {
            f.flags.insert(FileFlags::OVER_LIMIT);
            return true;
        }
        false
    }

    fn exclude_by_fragments(&self, f: &FileRecord) -> bool {
        let limit = self.options.fragments_limit;
        limit != 0 && f.fragments() < limit
    }

    /// Excludes a file only when every physically contiguous run is strictly
    /// smaller than the threshold.
    fn exclude_by_fragment_size(&self, f: &FileRecord) -> bool {
        let threshold = self.options.fragment_size_threshold;
        if threshold == 0 {
            return false;
        }
        let runs = f.blockmap.runs();
        !runs.is_empty()
            && runs
                .iter()
                .all(|r| r.length.saturating_mul(self.bytes_per_cluster) < threshold)
    }

    fn exclude_by_path(&self, f: &FileRecord) -> bool {
        if f.path.len() < MIN_PATH_LEN {
            debug!(path = %f.path, "invalid path excluded");
            return true;
        }
        let o = self.options;
        if !o.ex_filter.is_empty() && o.ex_filter.matches(&f.path) {
            return true;
        }
        if !o.cut_filter.is_empty() && !o.cut_filter.matches(&f.path) {
            return true;
        }
        !o.in_filter.is_empty() && !o.in_filter.matches(&f.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{BlockMap, FileAttributes};

    fn file(path: &str, extents: &[(u64, u64)]) -> FileRecord {
        FileRecord::new(path, BlockMap::from_extents(extents))
    }

    #[test]
    fn wildcard_basics() {
        assert!(wildcard_match("*.TMP", "C:\\x\\a.tmp"));
        assert!(wildcard_match("C:\\data\\*", "c:\\DATA\\f.bin"));
        assert!(wildcard_match("?:\\a*b?", "D:\\aXXbc"));
        assert!(!wildcard_match("*.tmp", "C:\\a.tmpx"));
        assert!(wildcard_match("*", ""));
        assert!(!wildcard_match("a", ""));
    }

    #[test]
    fn pattern_list_parsing() {
        let l = PatternList::parse(" *.tmp ; *.bak");
        assert_eq!(l.len(), 2);
        assert!(l.matches("C:\\x.bak"));
        assert!(PatternList::parse("   ").is_empty());
        assert!(PatternList::parse("a;;b").has_empty_pattern());
    }

    #[test]
    fn empty_path_skips_subtree() {
        let o = JobOptions::default();
        let mut f = file("", &[(1, 1)]);
        assert_eq!(FileFilter::new(&o, 4096).apply(&mut f), WalkDecision::SkipSubtree);
        assert!(f.is_excluded());
    }

    #[test]
    fn root_dot_is_trimmed() {
        let o = JobOptions::default();
        let mut f = file("C:\\.", &[(1, 1)]);
        FileFilter::new(&o, 4096).apply(&mut f);
        assert_eq!(f.path, "C:\\");
        assert!(!f.is_excluded());
    }

    #[test]
    fn resident_and_temporary_are_excluded() {
        let o = JobOptions::default();
        let filter = FileFilter::new(&o, 4096);
        let mut resident = file("C:\\small", &[]);
        filter.apply(&mut resident);
        assert!(resident.is_excluded());

        let mut tmp = file("C:\\t", &[(5, 1)]);
        tmp.attributes.insert(FileAttributes::TEMPORARY);
        filter.apply(&mut tmp);
        assert!(tmp.is_excluded());
    }

    #[test]
    fn size_limit_sets_over_limit() {
        let o = JobOptions {
            size_limit: Some(8192),
            ..Default::default()
        };
        let filter = FileFilter::new(&o, 4096);
        let mut big = file("C:\\big", &[(0, 3)]);
        filter.apply(&mut big);
        assert!(big.is_excluded() && big.flags.contains(FileFlags::OVER_LIMIT));
        let mut ok = file("C:\\ok", &[(0, 2)]);
        filter.apply(&mut ok);
        assert!(!ok.is_excluded());
    }

    #[test]
    fn fragments_limit() {
        let o = JobOptions {
            fragments_limit: 3,
            ..Default::default()
        };
        let filter = FileFilter::new(&o, 4096);
        let mut two = file("C:\\two", &[(0, 1), (5, 1)]);
        filter.apply(&mut two);
        assert!(two.is_excluded());
        let mut three = file("C:\\three", &[(0, 1), (5, 1), (9, 1)]);
        filter.apply(&mut three);
        assert!(!three.is_excluded());
    }

    #[test]
    fn fragment_size_threshold_is_strict() {
        let o = JobOptions {
            fragment_size_threshold: 10 * 4096,
            ..Default::default()
        };
        let filter = FileFilter::new(&o, 4096);

        let mut exact = file("C:\\exact", &[(100, 10)]);
        filter.apply(&mut exact);
        assert!(!exact.is_excluded());

        let mut small = file("C:\\small", &[(100, 4), (300, 9)]);
        filter.apply(&mut small);
        assert!(small.is_excluded());

        // adjacent blocks form one run of 10 clusters
        let mut joined = FileRecord::new(
            "C:\\joined",
            BlockMap::new(vec![
                crate::files::Block::new(0, 100, 6),
                crate::files::Block::new(6, 106, 4),
            ]),
        );
        filter.apply(&mut joined);
        assert!(!joined.is_excluded());
    }

    #[test]
    fn path_filters() {
        let o = JobOptions {
            in_filter: PatternList::parse("C:\\keep\\*"),
            ex_filter: PatternList::parse("*.log"),
            ..Default::default()
        };
        let filter = FileFilter::new(&o, 4096);
        let mut keep = file("C:\\keep\\a.bin", &[(1, 1)]);
        let mut log = file("C:\\keep\\a.log", &[(2, 1)]);
        let mut other = file("C:\\other\\a.bin", &[(3, 1)]);
        for f in [&mut keep, &mut log, &mut other] {
            filter.apply(f);
        }
        assert!(!keep.is_excluded());
        assert!(log.is_excluded());
        assert!(other.is_excluded());
    }

    #[test]
    fn reapplying_is_idempotent() {
        let o = JobOptions {
            size_limit: Some(4096),
            ..Default::default()
        };
        let filter = FileFilter::new(&o, 4096);
        let mut files = vec![file("C:\\a", &[(0, 1)]), file("C:\\b", &[(5, 3)])];
        for f in &mut files {
            filter.apply(f);
        }
        let first: Vec<_> = files.iter().map(|f| f.flags).collect();
        for f in &mut files {
            filter.apply(f);
        }
        let second: Vec<_> = files.iter().map(|f| f.flags).collect();
        assert_eq!(first, second);
    }
}

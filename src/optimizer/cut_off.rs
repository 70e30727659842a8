//! Already sorted runs of files.
//!
//! Quick optimization leaves alone files that already sit in order close to
//! each other. Consecutive entries of the sorted list form a group while
//! each one is unfragmented, lies behind at least one of the previous two,
//! and is close enough to the previous one.

use tracing::info;

use super::{
    OPTIMIZER_MAGIC_CONSTANT, OPTIMIZER_MAGIC_CONSTANT_M, OPTIMIZER_MAGIC_CONSTANT_N, SortedFiles,
};
use crate::files::{FileFlags, FileId, FileTable};
use crate::job::JobContext;
use crate::utils::format_bytes;

/// A run of at least two neighbours in the sorted list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortedGroup {
    /// Position of the first member in the sorted list.
    pub start: usize,
    pub count: u64,
    pub clusters: u64,
}

struct Tracker {
    start: usize,
    count: u64,
    clusters: u64,
    pplcn: Option<u64>,
    plcn: u64,
    prev_clusters: u64,
}

impl Tracker {
    fn open(files: &FileTable, ids: &[FileId], at: usize) -> Self {
        let f = &files[ids[at]];
        Self {
            start: at,
            count: 1,
            clusters: f.clusters(),
            pplcn: None,
            plcn: f.first_lcn().unwrap_or(0),
            prev_clusters: f.clusters(),
        }
    }

    fn close(&self, groups: &mut Vec<SortedGroup>) {
        if self.count > 1 {
            groups.push(SortedGroup {
                start: self.start,
                count: self.count,
                clusters: self.clusters,
            });
        }
    }
}

fn next_unfragmented(files: &FileTable, ids: &[FileId], from: usize) -> Option<usize> {
    (from..ids.len()).find(|&i| !files[ids[i]].is_fragmented())
}

/// Groups of already sorted files in `ids`, in list order.
pub fn find_sorted_groups(
    files: &FileTable,
    ids: &[FileId],
    bytes_per_cluster: u64,
    magic_length: u64,
) -> Vec<SortedGroup> {
    let mut groups = Vec::new();
    let Some(first) = next_unfragmented(files, ids, 0) else {
        return groups;
    };
    let mut group = Tracker::open(files, ids, first);

    let mut i = first + 1;
    while i < ids.len() {
        let f = &files[ids[i]];
        let lcn = f.first_lcn().unwrap_or(0);

        let mut belongs = !f.is_fragmented();
        if belongs {
            if let Some(pplcn) = group.pplcn {
                if lcn < pplcn && lcn < group.plcn {
                    belongs = false;
                }
            }
        }
        if belongs {
            let (distance, length) = if lcn < group.plcn {
                (group.plcn - lcn, f.clusters())
            } else {
                (lcn - group.plcn, group.prev_clusters)
            };
            let distance = distance.saturating_mul(bytes_per_cluster);
            let length = length.saturating_mul(bytes_per_cluster);
            let tolerance = length
                .checked_mul(OPTIMIZER_MAGIC_CONSTANT_M)
                .unwrap_or(u64::MAX);
            if distance > magic_length.max(tolerance) {
                belongs = false;
            }
        }

        if belongs {
            group.count += 1;
            group.clusters += f.clusters();
            group.pplcn = Some(group.plcn);
            group.plcn = lcn;
            group.prev_clusters = f.clusters();
            i += 1;
            continue;
        }

        group.close(&mut groups);
        let Some(next) = next_unfragmented(files, ids, i) else {
            return groups;
        };
        group = Tracker::open(files, ids, next);
        i = next + 1;
    }
    group.close(&mut groups);
    groups
}

/// Flag every large enough sorted group as already placed. Returns the
/// number of clusters left out of the optimization.
pub fn cut_off_sorted_out_files(ctx: &mut JobContext<'_>, sorted: &SortedFiles) -> u64 {
    let started = ctx.start_phase("cutting off sorted out files");
    let bytes_per_cluster = ctx.bytes_per_cluster();
    let magic_length = OPTIMIZER_MAGIC_CONSTANT.min(ctx.options.optimizer_size_limit);
    let ids = sorted.ids();

    let mut skipped = 0;
    for group in find_sorted_groups(&ctx.files, ids, bytes_per_cluster, magic_length) {
        let big_enough = group.clusters.saturating_mul(bytes_per_cluster) >= magic_length
            || group.count >= OPTIMIZER_MAGIC_CONSTANT_N;
        if !big_enough {
            continue;
        }
        let end = group.start + group.count as usize;
        for &id in &ids[group.start..end] {
            ctx.files[id].flags.insert(FileFlags::MOVED_TO_FRONT);
            skipped += ctx.files[id].clusters();
        }
    }

    info!(
        volume = %ctx.volume,
        clusters = skipped,
        size = %format_bytes(skipped.saturating_mul(bytes_per_cluster)),
        "already sorted files skipped"
    );
    ctx.stop_phase("cutting off sorted out files", started);
    skipped
}

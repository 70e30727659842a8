//! Order in which the move-to-front sweep places files.

use crate::config::{JobOptions, SortCriterion, SortOrder};
use crate::files::{FileId, FileRecord, FileTable};
use crate::job::JobContext;
use crate::planner::can_move_entirely;
use crate::volume::FsCapabilities;

/// Files the optimizer sorts, plus the sweep's position among them.
#[derive(Debug, Clone, Default)]
pub struct SortedFiles {
    order: Vec<FileId>,
    pos: usize,
}

impl SortedFiles {
    pub fn build(ctx: &JobContext<'_>) -> Self {
        Self::new(&ctx.files, &ctx.caps, ctx.bytes_per_cluster(), &ctx.options)
    }

    /// Every file below the optimizer size limit that can be moved as a
    /// whole, ordered by the configured criterion. Ties fall back to the
    /// case-insensitive path.
    pub fn new(
        files: &FileTable,
        caps: &FsCapabilities,
        bytes_per_cluster: u64,
        options: &JobOptions,
    ) -> Self {
        let limit = options.optimizer_size_limit;
        let mut order: Vec<FileId> = files
            .iter()
            .filter(|(_, f)| {
                f.clusters().saturating_mul(bytes_per_cluster) < limit
                    && can_move_entirely(f, caps)
            })
            .map(|(id, _)| id)
            .collect();
        order.sort_by_cached_key(|&id| sort_key(&files[id], id, options.sort));
        if options.sort_order == SortOrder::Descending {
            order.reverse();
        }
        Self { order, pos: 0 }
    }

    /// File the sweep stands on, `None` once it ran past the end.
    pub fn current(&self) -> Option<FileId> {
        self.order.get(self.pos).copied()
    }

    pub fn advance(&mut self) {
        if self.pos < self.order.len() {
            self.pos += 1;
        }
    }

    pub fn ids(&self) -> &[FileId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = FileId> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn sort_key(f: &FileRecord, id: FileId, criterion: SortCriterion) -> (i128, String, FileId) {
    let primary = match criterion {
        SortCriterion::Path => 0,
        SortCriterion::Size => i128::from(f.clusters()),
        SortCriterion::CreationTime => i128::from(f.creation_time),
        SortCriterion::ModificationTime => i128::from(f.modification_time),
        SortCriterion::AccessTime => i128::from(f.access_time),
    };
    (primary, f.path.to_lowercase(), id)
}

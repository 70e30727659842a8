//! Move-to-back sweep: clears the start of the volume by pushing small
//! files and fragments toward its end.

use tracing::info;

use crate::block_index::BlockRef;
use crate::config::JobOptions;
use crate::errors::CleanupError;
use crate::files::FileRecord;
use crate::job::JobContext;
use crate::planner::{cleanup_space, find_first_block, release_temp_space};

/// Whether `block` of `f` is worth evacuating toward the end of the volume.
pub fn is_block_quite_small(
    f: &FileRecord,
    block: &BlockRef,
    options: &JobOptions,
    bytes_per_cluster: u64,
) -> bool {
    let file_size = f.clusters().saturating_mul(bytes_per_cluster);
    let block_size = block.length.saturating_mul(bytes_per_cluster);
    let threshold = options.fragment_size_threshold;

    // files that will be sorted out anyway
    if file_size < options.optimizer_size_limit {
        return true;
    }
    if !f.is_fragmented() {
        return false;
    }
    if threshold == 0 {
        return true;
    }
    // defragmentation will move these entirely
    if file_size < threshold.saturating_mul(2) {
        return true;
    }
    if block_size >= threshold.saturating_mul(2) {
        return false;
    }
    match f.blockmap.run_containing(block.lcn) {
        Some(run) => run.length.saturating_mul(bytes_per_cluster) < threshold.saturating_mul(2),
        None => true,
    }
}

/// Scan from `*start_lcn` and evacuate every small block found. On return
/// `*start_lcn` is where free space ahead ran out, or the end of the volume.
pub fn move_files_to_back(ctx: &mut JobContext<'_>, start_lcn: &mut u64) {
    let started = ctx.start_phase("file moving to end");
    let moved_before = ctx.counters.moved_clusters;
    release_temp_space(ctx);

    let mut min_lcn = *start_lcn;
    let mut out_of_space = false;
    while !ctx.should_terminate() {
        let Some(block) = find_first_block(ctx, &mut min_lcn, true) else {
            break;
        };
        let small = is_block_quite_small(
            &ctx.files[block.file],
            &block,
            &ctx.options,
            ctx.bytes_per_cluster(),
        );
        if !small {
            continue;
        }
        let result = cleanup_space(
            ctx,
            block.file,
            block.vcn,
            block.length,
            0,
            block.lcn + block.length - 1,
        );
        if result == Err(CleanupError::InsufficientSpace) {
            *start_lcn = block.lcn;
            out_of_space = true;
            break;
        }
    }
    if !out_of_space {
        *start_lcn = ctx.geometry.total_clusters;
    }

    info!(
        volume = %ctx.volume,
        moved_clusters = ctx.counters.moved_clusters - moved_before,
        frontier = *start_lcn,
        "small blocks moved to the end"
    );
    ctx.stop_phase("file moving to end", started);
}

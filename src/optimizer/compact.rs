//! Directory and MFT compaction.
//!
//! The first cluster of a FAT directory and of the NTFS MFT cannot move, so
//! ordinary sorting never helps them. Their fragments are pulled together
//! behind the first block instead.

use tracing::{error, info};

use crate::errors::JobError;
use crate::files::{FileFlags, FileId, FileRecord};
use crate::job::JobContext;
use crate::planner::{Compaction, can_move, is_mft, optimize_file};
use crate::progress::Operation;
use crate::utils::format_bytes;

/// Clusters directory optimization may touch.
pub(crate) fn opt_dirs_cc(ctx: &JobContext<'_>) -> u64 {
    ctx.fragmented
        .iter()
        .map(|id| &ctx.files[id])
        .filter(|f| f.is_directory() && can_move(f))
        .map(|f| f.clusters().saturating_mul(2))
        .sum()
}

fn find_mft(ctx: &JobContext<'_>) -> Option<FileId> {
    ctx.files
        .iter()
        .find(|(_, f)| is_mft(f, &ctx.caps))
        .map(|(id, _)| id)
}

/// Clusters MFT optimization may touch.
pub(crate) fn opt_mft_cc(ctx: &JobContext<'_>) -> u64 {
    find_mft(ctx).map_or(0, |id| ctx.files[id].clusters().saturating_mul(2))
}

/// Compact every fragmented directory. Returns how many got better.
pub fn optimize_directories(ctx: &mut JobContext<'_>) -> u64 {
    ctx.operation = Operation::Optimization;
    let is_fat = ctx.caps.is_fat;
    for f in ctx.files.iter_mut() {
        f.flags.remove(FileFlags::CURRENTLY_EXCLUDED);
        if is_fat && f.is_directory() && !f.is_fragmented() {
            f.flags.insert(FileFlags::CURRENTLY_EXCLUDED);
        }
    }

    let started = ctx.start_phase("directories optimization");
    let moved_before = ctx.counters.moved_clusters;
    let mut optimized = 0;
    let mut cursor = ctx.fragmented.cursor();
    while let Some(id) = cursor.next(&ctx.fragmented) {
        if ctx.should_terminate() {
            break;
        }
        let f = &ctx.files[id];
        if f.is_directory() && can_move(f) {
            match optimize_file(ctx, id) {
                Compaction::Compacted | Compaction::Partial { .. } => optimized += 1,
                Compaction::NotNeeded | Compaction::Failed | Compaction::Cancelled => {}
            }
        }
        // one attempt per directory
        ctx.files[id].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
    }

    let moved = ctx.counters.moved_clusters - moved_before;
    info!(
        volume = %ctx.volume,
        directories = optimized,
        moved_clusters = moved,
        moved = %format_bytes(moved.saturating_mul(ctx.bytes_per_cluster())),
        "directories optimized"
    );
    ctx.stop_phase("directories optimization", started);
    ctx.files.clear_flag(FileFlags::CURRENTLY_EXCLUDED);
    optimized
}

fn list_mft_blocks(f: &FileRecord) {
    for (i, block) in f.blockmap.blocks().iter().enumerate() {
        info!(part = i, lcn = block.lcn, length = block.length, "mft block");
    }
}

/// Compact the MFT behind its first block.
pub fn optimize_mft_routine(ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    ctx.operation = Operation::Optimization;
    ctx.files.clear_flag(FileFlags::CURRENTLY_EXCLUDED);

    let started = ctx.start_phase("mft optimization");
    let moved_before = ctx.counters.moved_clusters;

    let result = match find_mft(ctx) {
        None => {
            error!(volume = %ctx.volume, "cannot find the $MFT file");
            Err(JobError::MftNotFound)
        }
        Some(id) => {
            info!("initial $MFT map:");
            list_mft_blocks(&ctx.files[id]);
            let outcome = optimize_file(ctx, id);
            info!(?outcome, "final $MFT map:");
            list_mft_blocks(&ctx.files[id]);
            Ok(())
        }
    };

    let moved_bytes = (ctx.counters.moved_clusters - moved_before)
        .saturating_mul(ctx.bytes_per_cluster());
    let elapsed = ctx.stop_phase("mft optimization", started);
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 {
        (moved_bytes as f64 / secs) as u64
    } else {
        0
    };
    info!(
        moved = %format_bytes(moved_bytes),
        speed = %format!("{}/s", format_bytes(speed)),
        "mft optimization finished"
    );

    ctx.files.clear_flag(FileFlags::CURRENTLY_EXCLUDED);
    result
}

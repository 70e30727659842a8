//! Disk optimizer.
//!
//! Sorts small files toward the start of the volume in passes made of two
//! sweeps: small blocks are first pushed toward the end of the volume, then
//! pulled back to the front in the requested order. FAT directories and the
//! NTFS MFT are compacted beforehand, and a defragmentation pass runs last.
//!
//! Notes:
//! - Optimization ignores the size and fragment-count filters; analysis is
//!   run with both relaxed for these job kinds.
//! - A pass ends when the move-to-front sweep has no candidates left.

mod back;
mod compact;
mod cut_off;
mod front;
mod sort;

use tracing::{info, warn};

use crate::analyze::{analyze, check_fragmentation_level};
use crate::defrag::defragment;
use crate::errors::JobError;
use crate::files::FileFlags;
use crate::job::{JobContext, JobKind};
use crate::planner::{can_move_entirely, release_temp_space};
use crate::progress::Operation;

pub use back::{is_block_quite_small, move_files_to_back};
pub use compact::{optimize_directories, optimize_mft_routine};
pub use cut_off::{SortedGroup, cut_off_sorted_out_files, find_sorted_groups};
pub use front::move_files_to_front;
pub use sort::SortedFiles;

/// Files below this size let the front frontier advance past them; groups at
/// least this large count as already sorted.
pub const OPTIMIZER_MAGIC_CONSTANT: u64 = 20 * 1024 * 1024;
/// Minimum member count of an already sorted group.
pub const OPTIMIZER_MAGIC_CONSTANT_N: u64 = 10;
/// Neighbours within this many file lengths of each other may share a group.
pub const OPTIMIZER_MAGIC_CONSTANT_M: u64 = 4;

/// Quick and full optimization entry point.
pub fn optimize(ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    analyze(ctx)?;
    if ctx.should_terminate() {
        return Ok(());
    }
    if !check_fragmentation_level(ctx) {
        return Ok(());
    }

    ctx.counters.processed_clusters = 0;
    // everything may travel to the end and back
    let allocated = count_clusters(ctx, 0);
    ctx.counters.clusters_to_process = allocated.saturating_mul(2);

    if ctx.caps.is_fat {
        let dirs = compact::opt_dirs_cc(ctx);
        ctx.counters.clusters_to_process += dirs;
        optimize_directories(ctx);
    }
    if ctx.caps.is_ntfs {
        let mft = compact::opt_mft_cc(ctx);
        ctx.counters.clusters_to_process += mft;
        if let Err(e) = optimize_mft_routine(ctx) {
            warn!(volume = %ctx.volume, code = e.code(), "MFT optimization skipped: {e}");
        }
    }

    optimize_routine(ctx);
    defragment(ctx);
    Ok(())
}

/// MFT optimization entry point.
pub fn optimize_mft(ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    analyze(ctx)?;
    if ctx.should_terminate() {
        return Ok(());
    }

    if !ctx.caps.is_ntfs {
        warn!(volume = %ctx.volume, fs = %ctx.caps.kind, "MFT can be optimized on NTFS volumes only");
        ctx.counters.processed_clusters = 0;
        ctx.counters.clusters_to_process = 1;
        ctx.operation = Operation::Optimization;
        return Ok(());
    }

    ctx.counters.processed_clusters = 0;
    let mft = compact::opt_mft_cc(ctx);
    ctx.counters.clusters_to_process = mft;
    let result = optimize_mft_routine(ctx);
    defragment(ctx);
    result
}

/// Allocated clusters between `start_lcn` and the end of the volume.
pub(crate) fn count_clusters(ctx: &mut JobContext<'_>, start_lcn: u64) -> u64 {
    release_temp_space(ctx);
    let free: u64 = ctx
        .free
        .iter()
        .map(|r| {
            if r.lcn >= start_lcn {
                r.length
            } else {
                r.end().saturating_sub(start_lcn)
            }
        })
        .sum();
    ctx.geometry
        .total_clusters
        .saturating_sub(start_lcn)
        .saturating_sub(free)
}

/// Clusters of sorted files that still wait for the front sweep.
fn clusters_to_optimize(ctx: &JobContext<'_>, sorted: &SortedFiles) -> u64 {
    sorted
        .iter()
        .map(|id| &ctx.files[id])
        .filter(|f| !f.flags.contains(FileFlags::MOVED_TO_FRONT) && can_move_entirely(f, &ctx.caps))
        .map(|f| f.clusters())
        .sum()
}

fn optimize_routine(ctx: &mut JobContext<'_>) {
    ctx.operation = Operation::Optimization;
    let started = ctx.start_phase("optimization");
    ctx.files.clear_flag(FileFlags::CURRENTLY_EXCLUDED);

    let mut sorted = SortedFiles::build(ctx);
    if ctx.kind == JobKind::QuickOptimization {
        cut_off_sorted_out_files(ctx, &sorted);
    }

    if !sorted.is_empty() {
        let mut start_lcn = 0;
        let mut end_lcn = 0;
        while !ctx.should_terminate() {
            ctx.counters.pass_number += 1;
            info!(volume = %ctx.volume, pass = ctx.counters.pass_number, "volume optimization pass");
            let allocated = count_clusters(ctx, start_lcn);
            let pending = clusters_to_optimize(ctx, &sorted);
            ctx.counters.clusters_to_process =
                ctx.counters.processed_clusters + allocated + pending;

            move_files_to_back(ctx, &mut end_lcn);
            if ctx.should_terminate() {
                break;
            }
            move_files_to_front(ctx, &mut start_lcn, end_lcn, &mut sorted);
            ctx.notify_progress();

            if sorted.current().is_none() {
                break;
            }
        }
    }

    ctx.stop_phase("optimization", started);
    ctx.files.clear_flag(FileFlags::CURRENTLY_EXCLUDED);
}

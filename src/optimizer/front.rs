//! Move-to-front sweep: places sorted files into the first free regions
//! behind the front frontier.

use tracing::{debug, info};

use super::{OPTIMIZER_MAGIC_CONSTANT, SortedFiles};
use crate::files::FileFlags;
use crate::job::JobContext;
use crate::planner::{can_move_entirely, move_file, release_temp_space};

/// Continue the sweep over `sorted` from where the last pass stopped.
///
/// Only regions starting before `end_lcn` are used. A file that finds no
/// region gets one more chance in the next pass and is skipped after that.
/// The frontier only moves past files below `OPTIMIZER_MAGIC_CONSTANT`.
pub fn move_files_to_front(
    ctx: &mut JobContext<'_>,
    start_lcn: &mut u64,
    end_lcn: u64,
    sorted: &mut SortedFiles,
) {
    let started = ctx.start_phase("file moving to front");
    let moved_before = ctx.counters.moved_clusters;
    release_temp_space(ctx);

    let bytes_per_cluster = ctx.bytes_per_cluster();
    let mut skipped_files = 0u64;
    while let Some(id) = sorted.current() {
        if ctx.should_terminate() {
            break;
        }
        if !can_move_entirely(&ctx.files[id], &ctx.caps) {
            sorted.advance();
            continue;
        }

        let clusters = ctx.files[id].clusters();
        let region = ctx
            .free
            .find_first_free_on_or_after(*start_lcn, Some(clusters))
            .filter(|r| r.lcn < end_lcn);
        let Some(region) = region else {
            let seen_before = ctx.files[id].flags.contains(FileFlags::REGION_NOT_FOUND);
            let nothing_moved = ctx.counters.moved_clusters == moved_before;
            if seen_before || (skipped_files > 0 && nothing_moved) {
                debug!(path = %ctx.files[id].path, clusters, "no region in front, file skipped");
                sorted.advance();
                skipped_files += 1;
                continue;
            }
            ctx.files[id].flags.insert(FileFlags::REGION_NOT_FOUND);
            break;
        };

        let first_vcn = ctx.files[id].blockmap.first().map_or(0, |b| b.vcn);
        let moved = move_file(ctx, id, first_vcn, clusters, region.lcn).is_ok();
        if moved && clusters.saturating_mul(bytes_per_cluster) < OPTIMIZER_MAGIC_CONSTANT {
            *start_lcn = region.lcn + 1;
        }
        ctx.files[id].flags.insert(FileFlags::MOVED_TO_FRONT);
        sorted.advance();
    }

    info!(
        volume = %ctx.volume,
        moved_clusters = ctx.counters.moved_clusters - moved_before,
        skipped_files,
        frontier = *start_lcn,
        "sorted files moved to the front"
    );
    ctx.stop_phase("file moving to front", started);
}

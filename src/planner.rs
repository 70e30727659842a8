//! File relocation planner.
//!
//! Decides source and target cluster ranges and keeps the free space
//! tracker, the block index and the fragmented-file index in step with every
//! move the host performs.
//!
//! Notes:
//! - Moves are issued in bursts of `clusters_at_once` clusters with a
//!   termination check between bursts, so no burst is ever left half applied.
//! - Clusters vacated by a move are parked as temporary space; they become
//!   usable again after `release_temp_space`.
//! - Per-file failures never escape as job errors; they are recorded in the
//!   counters and the file flags.

use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::analyze::reserve_mft_zone;
use crate::block_index::BlockRef;
use crate::errors::{CleanupError, MoveError};
use crate::files::{BlockMap, FileFlags, FileId, FileRecord, lcn_difference};
use crate::job::JobContext;
use crate::volume::{Extent, FsCapabilities};

/// True when the planner may move at least part of `f`.
pub fn can_move(f: &FileRecord) -> bool {
    !f.path.is_empty()
        && !f.blockmap.is_empty()
        && !f.flags.intersects(
            FileFlags::MOVED_TO_FRONT
                | FileFlags::CURRENTLY_EXCLUDED
                | FileFlags::EXCLUDED
                | FileFlags::LOCKED,
        )
}

/// True when `f` may be moved as a whole. The first cluster of a FAT
/// directory and the MFT stay where they are.
pub fn can_move_entirely(f: &FileRecord, caps: &FsCapabilities) -> bool {
    if !can_move(f) {
        return false;
    }
    if f.is_directory() && !caps.directories_movable_entirely {
        return false;
    }
    !is_mft(f, caps)
}

pub fn is_mft(f: &FileRecord, caps: &FsCapabilities) -> bool {
    caps.is_ntfs
        && f.path
            .get(3..)
            .is_some_and(|rest| rest.eq_ignore_ascii_case("$MFT"))
}

/// Check whether the host lets us open `id` for moving. The verdict is
/// cached in the file flags for the rest of the job.
pub fn is_file_locked(ctx: &mut JobContext<'_>, id: FileId) -> bool {
    let flags = ctx.files[id].flags;
    if flags.contains(FileFlags::NOT_LOCKED) {
        return false;
    }
    if flags.contains(FileFlags::LOCKED) {
        return true;
    }
    match ctx.host.open_for_move(&ctx.files[id]) {
        Ok(handle) => {
            ctx.host.close(handle);
            ctx.files[id].flags.insert(FileFlags::NOT_LOCKED);
            false
        }
        Err(e) => {
            trace!(path = %ctx.files[id].path, error = %e, "cannot open file for moving");
            mark_locked(ctx, id);
            true
        }
    }
}

fn mark_locked(ctx: &mut JobContext<'_>, id: FileId) {
    let f = &mut ctx.files[id];
    if !f.flags.contains(FileFlags::LOCKED) {
        f.flags.insert(FileFlags::LOCKED);
        f.flags.remove(FileFlags::NOT_LOCKED);
        ctx.counters.locked_files += 1;
    }
}

/// First movable, unlocked block at or after `*min_lcn`. Advances `*min_lcn`
/// past every block examined so repeated calls walk the volume forward.
pub fn find_first_block(
    ctx: &mut JobContext<'_>,
    min_lcn: &mut u64,
    skip_partially_movable: bool,
) -> Option<BlockRef> {
    let started = Instant::now();
    let mut found = None;
    while !ctx.should_terminate() {
        let Some(block) = ctx.blocks.from_lcn(*min_lcn).next() else {
            break;
        };
        *min_lcn = block.lcn + 1;
        let f = &ctx.files[block.file];
        if !can_move(f) {
            continue;
        }
        if skip_partially_movable && !can_move_entirely(f, &ctx.caps) {
            continue;
        }
        if is_file_locked(ctx, block.file) {
            continue;
        }
        found = Some(block);
        break;
    }
    ctx.perf.searching += started.elapsed();
    found
}

/// Make clusters parked by earlier moves available again.
pub fn release_temp_space(ctx: &mut JobContext<'_>) {
    if ctx.free.total_temporary() == 0 {
        return;
    }
    let started = Instant::now();
    if ctx.options.dry_run {
        ctx.free.release_temporary();
    } else {
        match ctx.host.free_regions(&ctx.volume, false) {
            Ok(regions) => {
                ctx.free.reload(regions);
                reserve_mft_zone(ctx);
            }
            Err(e) => {
                warn!(error = %e, "cannot reread free space; merging temporary space back");
                ctx.free.release_temporary();
            }
        }
    }
    ctx.perf.temp_space_release += started.elapsed();
}

/// Move `length` clusters of `id`, starting at `start_vcn`, to `target_lcn`.
///
/// Every successful call counts as one move. Hard failures count as failed
/// moves and flag the file; a target already in use and cancellation do not.
pub fn move_file(
    ctx: &mut JobContext<'_>,
    id: FileId,
    start_vcn: u64,
    length: u64,
    target_lcn: u64,
) -> Result<(), MoveError> {
    let started = Instant::now();
    let result = relocate(ctx, id, start_vcn, length, target_lcn);
    ctx.perf.moving += started.elapsed();

    match &result {
        Ok(()) => {
            ctx.counters.total_moves += 1;
            debug!(
                path = %ctx.files[id].path,
                start_vcn,
                length,
                target_lcn,
                "file moved"
            );
        }
        Err(MoveError::Cancelled) => {}
        Err(e) if e.is_retryable() => {
            debug!(
                path = %ctx.files[id].path,
                target_lcn,
                "target in use, another region will be tried"
            );
        }
        Err(e) => {
            ctx.counters.failed_moves += 1;
            ctx.files[id].flags.insert(FileFlags::MOVING_FAILED);
            if *e == MoveError::Locked {
                mark_locked(ctx, id);
            }
            debug!(
                path = %ctx.files[id].path,
                start_vcn,
                length,
                target_lcn,
                code = e.code(),
                "move failed: {e}"
            );
        }
    }
    ctx.notify_progress();
    result
}

fn relocate(
    ctx: &mut JobContext<'_>,
    id: FileId,
    start_vcn: u64,
    length: u64,
    target_lcn: u64,
) -> Result<(), MoveError> {
    if length == 0 {
        return Err(MoveError::Failed("empty range".to_string()));
    }
    let segments = ctx.files[id]
        .blockmap
        .segments(start_vcn, length)
        .ok_or_else(|| MoveError::Failed("range lies outside the file".to_string()))?;
    let fits = target_lcn
        .checked_add(length)
        .is_some_and(|end| end <= ctx.geometry.total_clusters);
    if !fits {
        return Err(MoveError::Failed("target lies outside the volume".to_string()));
    }
    if is_file_locked(ctx, id) {
        return Err(MoveError::Locked);
    }

    let old_map = ctx.files[id].blockmap.clone();
    let mut moved = 0u64;
    let mut outcome = Ok(());
    'segments: for (vcn, extent) in segments {
        let mut done = 0;
        while done < extent.length {
            if ctx.should_terminate() {
                outcome = Err(MoveError::Cancelled);
                break 'segments;
            }
            let n = (extent.length - done).min(ctx.clusters_at_once);
            if !ctx.options.dry_run {
                if let Err(e) = ctx
                    .host
                    .move_clusters(&ctx.files[id], vcn + done, n, target_lcn + moved)
                {
                    outcome = Err(MoveError::from(e));
                    break 'segments;
                }
            }
            done += n;
            moved += n;
        }
    }

    if moved > 0 {
        apply_move(ctx, id, &old_map, start_vcn, moved, target_lcn);
    }
    outcome
}

/// Bring the tracker and both indices in line with a completed move.
fn apply_move(
    ctx: &mut JobContext<'_>,
    id: FileId,
    old_map: &BlockMap,
    start_vcn: u64,
    moved: u64,
    target_lcn: u64,
) {
    let refreshed = if ctx.options.dry_run {
        None
    } else {
        ctx.host.refresh_block_map(&ctx.files[id])
    };
    let new_map = refreshed
        .or_else(|| old_map.relocate(start_vcn, moved, target_lcn))
        .unwrap_or_else(|| old_map.clone());

    let before: Vec<Extent> = old_map.extents().collect();
    let after: Vec<Extent> = new_map.extents().collect();
    for e in lcn_difference(&before, &after) {
        ctx.free.add_temporary(e.lcn, e.length);
    }
    for e in lcn_difference(&after, &before) {
        ctx.free.subtract(e.lcn, e.length);
    }

    ctx.blocks.remove_file(id, old_map);
    ctx.blocks.add_file(id, &new_map);
    ctx.files[id].blockmap = new_map;

    let f = &ctx.files[id];
    if f.is_fragmented() && !f.is_excluded() {
        ctx.fragmented.insert(id, f);
    } else {
        ctx.fragmented.remove(id);
    }
    ctx.counters.moved_clusters += moved;
    ctx.counters.processed_clusters += moved;
}

/// Vacate `clusters` clusters of `id` starting at `start_vcn` by moving them
/// into the free regions closest to the end of the volume, never into
/// `[reserved_start, reserved_end]`.
pub fn cleanup_space(
    ctx: &mut JobContext<'_>,
    id: FileId,
    start_vcn: u64,
    clusters: u64,
    reserved_start: u64,
    reserved_end: u64,
) -> Result<(), CleanupError> {
    let mut vcn = start_vcn;
    let mut remaining = clusters;
    while remaining > 0 {
        let Some(region) = ctx.free.find_last_usable(reserved_start, reserved_end) else {
            return Err(CleanupError::InsufficientSpace);
        };
        let n = region.length.min(remaining);
        let target = region.end() - n;
        move_file(ctx, id, vcn, n, target).map_err(CleanupError::MoveFailed)?;
        vcn += n;
        remaining -= n;
    }
    Ok(())
}

/// VCN reached after walking `n` clusters forward from `vcn` through the map.
/// May point one past the last cluster; `None` when the walk leaves the file.
pub fn advance_vcn(map: &BlockMap, vcn: u64, n: u64) -> Option<u64> {
    if n == 0 {
        return Some(vcn);
    }
    let blocks = map.blocks();
    let mut current = vcn;
    let mut n = n;
    for (i, block) in blocks.iter().enumerate() {
        if block.end_vcn() <= vcn {
            continue;
        }
        let left = block.length - current.saturating_sub(block.vcn);
        let next = map.successor(i).map(|j| blocks[j].vcn);
        if n > left {
            n -= left;
            current = next?;
        } else if n == left {
            return Some(next.unwrap_or(block.end_vcn()));
        } else {
            return Some(current + n);
        }
    }
    None
}

/// How an `optimize_file` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compaction {
    /// Single block, or not movable on this volume.
    NotNeeded,
    Compacted,
    /// Some clusters were placed behind the first block, `remaining` were not.
    Partial { remaining: u64 },
    /// Nothing could be placed.
    Failed,
    Cancelled,
}

/// Pull the fragments of `id` together behind its first block, which stays
/// where it is. Blocks of other files in the way are pushed toward the end of
/// the volume and flagged `FRAGMENTED_BY_FILE_OPT`.
pub fn optimize_file(ctx: &mut JobContext<'_>, id: FileId) -> Compaction {
    let (first, second_vcn, clusters) = {
        let f = &ctx.files[id];
        if !can_move(f) || !f.is_fragmented() {
            return Compaction::NotNeeded;
        }
        let blocks = f.blockmap.blocks();
        let (Some(first), Some(second)) = (blocks.first(), blocks.get(1)) else {
            return Compaction::NotNeeded;
        };
        (*first, second.vcn, f.clusters())
    };
    if is_file_locked(ctx, id) {
        return Compaction::Failed;
    }

    let total = clusters - first.length;
    let mut to_process = total;
    if to_process == 0 {
        return Compaction::NotNeeded;
    }
    let first_cluster = first.lcn;
    let fragments_before = ctx.files[id].fragments();
    // end of the clusters already placed behind the first block
    let mut frontier = first.end_lcn();
    let mut start_lcn = frontier;
    let mut start_vcn = second_vcn;

    'outer: while to_process > 0 {
        if ctx.should_terminate() {
            break;
        }
        release_temp_space(ctx);
        if ctx.free.is_empty() {
            break;
        }

        let searching = Instant::now();
        let mut target = ctx.free.find_first_free_on_or_after(start_lcn, None);
        ctx.perf.searching += searching.elapsed();

        // vacate whatever sits between the frontier and the target region
        let end_lcn = target.map_or(ctx.geometry.total_clusters, |r| r.lcn);
        let mut to_cleanup = to_process;
        let mut cleaned_up = false;
        let mut region = Extent::default();
        // past a skipped region nothing can join the frontier any more
        while to_cleanup > 0 && start_lcn == frontier {
            if ctx.should_terminate() {
                break 'outer;
            }
            let mut min_lcn = start_lcn;
            let Some(block) = find_first_block(ctx, &mut min_lcn, false) else {
                break;
            };
            if block.lcn >= end_lcn {
                break;
            }
            // only grow the region with blocks right behind it
            if cleaned_up && (block.lcn != region.end() || block.file == id) {
                break;
            }

            if block.file == id && block.vcn == start_vcn {
                if block.lcn != frontier {
                    break;
                }
                let map = &ctx.files[id].blockmap;
                let is_last = map
                    .position_of_vcn(block.vcn)
                    .and_then(|i| map.successor(i))
                    .is_none();
                if to_process <= block.length || is_last {
                    to_process = 0;
                    break 'outer;
                }
                to_process -= block.length;
                to_cleanup = to_cleanup.saturating_sub(block.length);
                start_vcn = block.vcn + block.length;
                start_lcn = block.lcn + block.length;
                frontier = start_lcn;
                continue;
            }

            let n = to_cleanup.min(block.length);
            let result = cleanup_space(
                ctx,
                block.file,
                block.vcn,
                n,
                first_cluster,
                block.lcn + block.length - 1,
            );
            if result == Err(CleanupError::InsufficientSpace) {
                break 'outer;
            }
            if block.file != id {
                ctx.files[block.file]
                    .flags
                    .insert(FileFlags::FRAGMENTED_BY_FILE_OPT);
            }
            if result.is_err() {
                if !cleaned_up {
                    start_lcn = block.lcn + n;
                    continue 'outer;
                }
                break;
            }

            if !cleaned_up {
                region.lcn = block.lcn;
            }
            region.length += n;
            target = Some(region);
            start_lcn = region.end();
            to_cleanup -= n;
            cleaned_up = true;
        }

        let Some(rgn) = target else {
            break;
        };
        // a region away from the frontier only helps when it takes the whole
        // fragmented remainder; a partial fill would split the file further
        if rgn.lcn != frontier
            && (rgn.length < to_process || !remainder_fragmented(&ctx.files[id].blockmap, start_vcn))
        {
            start_lcn = rgn.end();
            continue;
        }
        let n = to_process.min(rgn.length);
        let next_vcn = advance_vcn(&ctx.files[id].blockmap, start_vcn, n);
        match move_file(ctx, id, start_vcn, n, rgn.lcn) {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                start_lcn = rgn.lcn + n;
                continue;
            }
            Err(_) => break,
        }
        to_process -= n;
        start_lcn = rgn.lcn + n;
        frontier = start_lcn;
        match next_vcn {
            Some(vcn) => start_vcn = vcn,
            None => break,
        }
    }

    let fragments_after = ctx.files[id].fragments();
    if ctx.is_cancelled() {
        Compaction::Cancelled
    } else if to_process == 0 && fragments_after <= fragments_before {
        Compaction::Compacted
    } else if to_process == 0 {
        warn!(
            path = %ctx.files[id].path,
            fragments_before,
            fragments_after,
            "compaction left the file more fragmented"
        );
        Compaction::Partial {
            remaining: unplaced_clusters(&ctx.files[id].blockmap),
        }
    } else if to_process == total {
        Compaction::Failed
    } else {
        Compaction::Partial {
            remaining: to_process,
        }
    }
}

/// True when the part of the file from `vcn` on spans more than one block.
fn remainder_fragmented(map: &BlockMap, vcn: u64) -> bool {
    map.blocks().iter().filter(|b| b.end_vcn() > vcn).count() > 1
}

/// Clusters outside the run that starts with the first block.
fn unplaced_clusters(map: &BlockMap) -> u64 {
    let head = map.runs().first().map_or(0, |r| r.length);
    map.clusters().saturating_sub(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{Block, FileAttributes};
    use crate::volume::FsKind;

    #[test]
    fn advance_walks_across_blocks() {
        let map = BlockMap::new(vec![
            Block::new(0, 100, 10),
            Block::new(10, 500, 10),
            Block::new(20, 900, 5),
        ]);
        assert_eq!(advance_vcn(&map, 0, 0), Some(0));
        assert_eq!(advance_vcn(&map, 2, 3), Some(5));
        assert_eq!(advance_vcn(&map, 5, 5), Some(10));
        assert_eq!(advance_vcn(&map, 5, 12), Some(17));
        assert_eq!(advance_vcn(&map, 10, 15), Some(25));
        assert_eq!(advance_vcn(&map, 10, 16), None);
    }

    #[test]
    fn movability_rules() {
        let ntfs = FsKind::Ntfs.capabilities();
        let fat = FsKind::Fat32.capabilities();

        let mut dir = FileRecord::new("C:\\dir", BlockMap::from_extents(&[(5, 1)]));
        dir.attributes.insert(FileAttributes::DIRECTORY);
        assert!(can_move_entirely(&dir, &ntfs));
        assert!(!can_move_entirely(&dir, &fat));
        assert!(can_move(&dir));

        let mft = FileRecord::new("C:\\$Mft", BlockMap::from_extents(&[(5, 1)]));
        assert!(is_mft(&mft, &ntfs));
        assert!(!is_mft(&mft, &fat));
        assert!(can_move(&mft) && !can_move_entirely(&mft, &ntfs));

        let mut excluded = FileRecord::new("C:\\x", BlockMap::from_extents(&[(5, 1)]));
        excluded.flags.insert(FileFlags::EXCLUDED);
        assert!(!can_move(&excluded));
        assert!(!can_move(&FileRecord::new("C:\\resident", BlockMap::default())));
    }
}

//! Defragmentation and whole-file placement jobs.
//!
//! Notes:
//! - A defragmentation pass moves each fragmented file as a whole into the
//!   first free region that holds it. Passes repeat while they make moves.
//! - Files that cannot be placed are marked currently excluded and are not
//!   retried until the pass loop finishes.

use tracing::{debug, info};

use crate::analyze::{analyze, check_fragmentation_level};
use crate::errors::JobError;
use crate::files::{FileFlags, FileId};
use crate::job::JobContext;
use crate::planner::{can_move_entirely, is_file_locked, move_file, release_temp_space};
use crate::progress::Operation;
use crate::volume::Extent;

/// Where single-file jobs put the files they select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Front,
    End,
}

/// Defragmentation job: analyze, then defragment.
pub fn defragment_job(ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    analyze(ctx)?;
    if ctx.should_terminate() || !check_fragmentation_level(ctx) {
        return Ok(());
    }
    ctx.counters.processed_clusters = 0;
    ctx.counters.clusters_to_process = ctx
        .fragmented
        .iter()
        .map(|id| &ctx.files[id])
        .filter(|f| can_move_entirely(f, &ctx.caps))
        .map(|f| f.clusters())
        .sum();
    defragment(ctx);
    Ok(())
}

/// Run defragmentation passes until one makes no moves.
pub fn defragment(ctx: &mut JobContext<'_>) {
    ctx.operation = Operation::Defragmentation;
    let started = ctx.start_phase("defragmentation");
    ctx.files.clear_flag(FileFlags::CURRENTLY_EXCLUDED);

    let mut defragmented = 0;
    while !ctx.should_terminate() && !ctx.fragmented.is_empty() {
        let moves_before = ctx.counters.total_moves;
        defragmented += defragment_pass(ctx);
        ctx.notify_progress();
        if ctx.counters.total_moves == moves_before {
            break;
        }
    }

    info!(
        volume = %ctx.volume,
        defragmented,
        still_fragmented = ctx.fragmented.len(),
        "defragmentation finished"
    );
    ctx.stop_phase("defragmentation", started);
    ctx.files.clear_flag(FileFlags::CURRENTLY_EXCLUDED);
}

fn first_fit(ctx: &mut JobContext<'_>, clusters: u64) -> Option<Extent> {
    if let Some(region) = ctx.free.find_first_free_on_or_after(0, Some(clusters)) {
        return Some(region);
    }
    if ctx.free.total_temporary() == 0 {
        return None;
    }
    release_temp_space(ctx);
    ctx.free.find_first_free_on_or_after(0, Some(clusters))
}

fn defragment_pass(ctx: &mut JobContext<'_>) -> u64 {
    release_temp_space(ctx);
    let mut defragmented = 0;
    let mut cursor = ctx.fragmented.cursor();
    while let Some(id) = cursor.next(&ctx.fragmented) {
        if ctx.should_terminate() {
            break;
        }
        let f = &ctx.files[id];
        if !f.is_fragmented() || !can_move_entirely(f, &ctx.caps) {
            continue;
        }
        if is_file_locked(ctx, id) {
            continue;
        }

        let clusters = ctx.files[id].clusters();
        let Some(region) = first_fit(ctx, clusters) else {
            debug!(path = %ctx.files[id].path, clusters, "no free region large enough");
            ctx.files[id].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
            continue;
        };

        let first_vcn = ctx.files[id].blockmap.first().map_or(0, |b| b.vcn);
        match move_file(ctx, id, first_vcn, clusters, region.lcn) {
            Ok(()) => {
                if !ctx.files[id].is_fragmented() {
                    defragmented += 1;
                }
            }
            // another region may turn up in the next pass
            Err(e) if e.is_retryable() => {}
            Err(_) => ctx.files[id].flags.insert(FileFlags::CURRENTLY_EXCLUDED),
        }
    }
    defragmented
}

/// Single-file placement job: move every selected file as a whole to the
/// front or the end of the volume.
pub fn move_files_job(ctx: &mut JobContext<'_>, placement: Placement) -> Result<(), JobError> {
    analyze(ctx)?;
    if ctx.should_terminate() {
        return Ok(());
    }

    ctx.operation = Operation::Optimization;
    let phase = match placement {
        Placement::Front => "file moving to front",
        Placement::End => "file moving to end",
    };
    let started = ctx.start_phase(phase);
    release_temp_space(ctx);

    let selected: Vec<FileId> = ctx
        .files
        .iter()
        .filter(|(_, f)| !f.is_excluded() && can_move_entirely(f, &ctx.caps))
        .map(|(id, _)| id)
        .collect();
    ctx.counters.processed_clusters = 0;
    ctx.counters.clusters_to_process = selected.iter().map(|&id| ctx.files[id].clusters()).sum();

    let mut placed = 0u64;
    for id in selected {
        if ctx.should_terminate() {
            break;
        }
        if is_file_locked(ctx, id) {
            continue;
        }
        let f = &ctx.files[id];
        let clusters = f.clusters();
        let (Some(first_lcn), Some(first_vcn)) = (f.first_lcn(), f.blockmap.first().map(|b| b.vcn))
        else {
            continue;
        };

        let target = match placement {
            Placement::Front => ctx
                .free
                .find_first_free_on_or_after(0, Some(clusters))
                .filter(|r| r.lcn < first_lcn)
                .map(|r| r.lcn),
            Placement::End => ctx
                .free
                .find_last_fitting(clusters)
                .filter(|r| r.lcn > first_lcn)
                .map(|r| r.end() - clusters),
        };
        let Some(target) = target else {
            debug!(path = %ctx.files[id].path, ?placement, "no better position found");
            continue;
        };
        if move_file(ctx, id, first_vcn, clusters, target).is_ok() {
            placed += 1;
        }
    }

    info!(volume = %ctx.volume, files = placed, ?placement, "files moved");
    ctx.stop_phase(phase, started);
    Ok(())
}

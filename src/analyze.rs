//! Volume analysis.
//!
//! Rebuilds every piece of job state from a fresh scan: geometry, the free
//! space layout, MFT extents, the file table with its block index, and the
//! fragmented-file index.
//!
//! Notes:
//! - A full disk (no free extents) is a valid state and only logged.
//! - Files are never dropped by the filter, only flagged, so the counters
//!   and the block index cover the whole volume.

use std::cell::Cell;
use tracing::{debug, error, info, warn};

use crate::block_index::BlockIndex;
use crate::config::JobOptions;
use crate::errors::JobError;
use crate::files::{FileId, FileRecord, FileTable};
use crate::filter::{FileFilter, MIN_PATH_LEN, PatternList};
use crate::fragmented::FragmentedIndex;
use crate::free_space::FreeSpace;
use crate::job::{JobContext, JobKind};
use crate::planner;
use crate::platform::{WalkDecision, WalkScope, WalkVisitor};
use crate::progress::{Operation, ProgressCounters, percentage};
use crate::shutdown::Terminator;
use crate::volume::{FsCapabilities, FsKind, MftLayout, clusters_at_once};

/// NTFS metafiles in the volume root that the system keeps open.
const LOCKED_METAFILES: [&str; 6] = [
    "$bitmap",
    "$extend\\$objid",
    "$extend\\$usnjrnl",
    "$logfile",
    "$mft::$bitmap",
    "$secure",
];

const LOCKED_SYSTEM_FILES: [&str; 3] = ["pagefile.sys", "hiberfil.sys", "swapfile.sys"];

/// Analyze the volume and fill `ctx` with fresh state.
pub fn analyze(ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    let started = ctx.start_phase("analysis");
    ctx.operation = Operation::Analysis;

    get_volume_information(ctx)?;
    get_free_space_layout(ctx);
    get_mft_zones_layout(ctx);
    find_files(ctx)?;
    flag_well_known_locked_files(ctx);
    produce_list_of_fragmented_files(ctx);
    check_fragmentation_level(ctx);
    check_requested_action(ctx)?;

    ctx.perf.analysis += ctx.stop_phase("analysis", started);
    ctx.notify_progress();
    Ok(())
}

fn get_volume_information(ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    ctx.mft = None;
    ctx.caps = FsCapabilities::default();
    ctx.counters.reset_statistics();
    ctx.files = FileTable::default();
    ctx.blocks = BlockIndex::new();
    ctx.free = FreeSpace::new();
    ctx.fragmented = FragmentedIndex::new();

    let geometry = ctx.host.volume_geometry(&ctx.volume)?;
    if geometry.dirty {
        error!(volume = %ctx.volume, "volume is dirty");
        return Err(JobError::DirtyVolume);
    }

    ctx.counters.total_space = geometry.total_bytes();
    ctx.counters.free_space = geometry.free_bytes;
    ctx.counters.used_clusters = geometry.used_clusters();
    info!(
        total_clusters = geometry.total_clusters,
        used_clusters = ctx.counters.used_clusters,
        bytes_per_cluster = geometry.bytes_per_cluster,
        "volume geometry"
    );
    if geometry.total_clusters == 0 || geometry.bytes_per_cluster == 0 {
        error!("wrong volume geometry detected");
        return Err(JobError::InvalidGeometry {
            total_clusters: geometry.total_clusters,
            bytes_per_cluster: geometry.bytes_per_cluster,
        });
    }

    ctx.clusters_at_once = clusters_at_once(geometry.device_capacity, geometry.bytes_per_cluster);
    debug!(clusters_at_once = ctx.clusters_at_once, "move burst size set");

    let kind = FsKind::classify(&geometry.fs_name);
    info!(fs = %geometry.fs_name, "{kind} partition detected");
    if kind == FsKind::Unknown {
        warn!("file system type is not recognized; type independent routines will be used");
    }
    ctx.caps = kind.capabilities();

    ctx.counters.clusters_to_process = geometry.total_clusters;
    ctx.counters.processed_clusters = 0;

    let threshold = ctx.options.fragment_size_threshold;
    if threshold != 0 && threshold <= geometry.bytes_per_cluster {
        info!(threshold, "fragment size threshold is below the cluster size, so it will be ignored");
        ctx.options.fragment_size_threshold = 0;
    }

    ctx.geometry = geometry;
    Ok(())
}

fn get_free_space_layout(ctx: &mut JobContext<'_>) {
    let regions = match ctx.host.free_regions(&ctx.volume, true) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "cannot read the free space layout");
            Vec::new()
        }
    };
    ctx.counters.processed_clusters += regions.iter().map(|&(_, len)| len).sum::<u64>();
    ctx.free.reload(regions);
    info!(
        free_bytes = ctx.geometry.free_bytes,
        regions = ctx.free.count(),
        "free space layout"
    );
    if ctx.free.is_empty() {
        warn!("disk is full or some error has been encountered");
    }
}

fn get_mft_zones_layout(ctx: &mut JobContext<'_>) {
    if ctx.caps.kind != FsKind::Ntfs {
        return;
    }
    let Some(facts) = ctx.geometry.ntfs.as_ref() else {
        debug!("no NTFS facts reported");
        return;
    };
    let layout = MftLayout::from_facts(
        facts,
        ctx.geometry.bytes_per_cluster,
        ctx.geometry.total_clusters,
    );
    ctx.counters.mft_size = layout.mft.length.saturating_mul(ctx.geometry.bytes_per_cluster);
    info!(start = layout.mft.lcn, length = layout.mft.length, "mft");
    if let Some(zone) = layout.zone {
        info!(start = zone.lcn, length = zone.length, "mft zone");
    }
    info!(start = layout.mirror.lcn, length = layout.mirror.length, "mft mirror");
    ctx.mft = Some(layout);
    reserve_mft_zone(ctx);
}

/// Take the MFT zone out of free space when the options ask for it.
pub(crate) fn reserve_mft_zone(ctx: &mut JobContext<'_>) {
    if !ctx.options.reserve_mft_zone {
        return;
    }
    if let Some(zone) = ctx.mft.and_then(|m| m.zone) {
        ctx.free.subtract(zone.lcn, zone.length);
    }
}

/// Which part of the volume the walk covers. In context menu mode on
/// non-NTFS volumes a specific cut path narrows it to the parent directory.
pub(crate) fn walk_scope(options: &JobOptions, kind: FsKind) -> WalkScope {
    if !options.context_menu || kind == FsKind::Ntfs {
        return WalkScope::Volume;
    }
    let Some(first) = options.cut_filter.first() else {
        return WalkScope::Volume;
    };
    if first.len() < MIN_PATH_LEN {
        return WalkScope::Volume;
    }
    // X:\ and X:\* cover the whole volume
    if matches!(first.chars().nth(3), None | Some('*')) {
        return WalkScope::Volume;
    }
    let recursive = options.cut_filter.len() > 1;
    match first.rsplit_once('\\') {
        Some((parent, _)) if parent.len() > MIN_PATH_LEN => WalkScope::Directory {
            path: parent.to_string(),
            recursive,
        },
        _ => WalkScope::Volume,
    }
}

fn count_file(counters: &mut ProgressCounters, f: &FileRecord, bytes_per_cluster: u64) {
    counters.files += 1;
    if f.is_directory() {
        counters.directories += 1;
    }
    if f.is_compressed() {
        counters.compressed += 1;
    }
    counters.processed_clusters += f.clusters();
    counters.sizes.record(f.clusters().saturating_mul(bytes_per_cluster));
}

struct AnalysisVisitor<'o, 'c> {
    filter: FileFilter<'o>,
    cut_filter: &'o PatternList,
    context_menu: bool,
    counters: &'c mut ProgressCounters,
    bytes_per_cluster: u64,
    terminator: &'o dyn Terminator,
    terminated: Cell<bool>,
}

impl WalkVisitor for AnalysisVisitor<'_, '_> {
    fn on_entry(&mut self, file: &mut FileRecord) -> WalkDecision {
        let decision = self.filter.apply(file);
        // count everything in context menu mode to avoid ambiguity
        if decision == WalkDecision::Keep
            && self.context_menu
            && (self.cut_filter.is_empty() || self.cut_filter.matches(&file.path))
        {
            count_file(self.counters, file, self.bytes_per_cluster);
        }
        decision
    }

    fn on_progress(&mut self, file: &FileRecord) {
        if !self.context_menu {
            count_file(self.counters, file, self.bytes_per_cluster);
        }
    }

    fn should_terminate(&self) -> bool {
        if !self.terminated.get() && self.terminator.should_terminate() {
            self.terminated.set(true);
        }
        self.terminated.get()
    }
}

fn find_files(ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    let bytes_per_cluster = ctx.bytes_per_cluster();
    let scope = walk_scope(&ctx.options, ctx.caps.kind);
    let terminator = ctx.terminator();

    // optimization sorts everything; the size and fragment count limits do not apply
    let relaxed;
    let options = if matches!(ctx.kind, JobKind::QuickOptimization | JobKind::FullOptimization) {
        relaxed = JobOptions {
            size_limit: None,
            fragments_limit: 0,
            ..ctx.options.clone()
        };
        &relaxed
    } else {
        &ctx.options
    };

    let mut visitor = AnalysisVisitor {
        filter: FileFilter::new(options, bytes_per_cluster),
        cut_filter: &options.cut_filter,
        context_menu: options.context_menu,
        counters: &mut ctx.counters,
        bytes_per_cluster,
        terminator,
        terminated: Cell::new(false),
    };
    debug!(?scope, "file walk started");
    let walked = ctx.host.walk_files(&ctx.volume, &scope, &mut visitor);
    if visitor.terminated.get() {
        ctx.mark_cancelled();
    }

    let records = match walked {
        Ok(records) => records,
        Err(e) if ctx.is_cancelled() => {
            debug!(error = %e, "file walk interrupted");
            Vec::new()
        }
        Err(e) => {
            error!(error = %e, "file enumeration failed");
            return Err(JobError::FileEnumeration);
        }
    };

    for f in &records {
        // excluded or unfragmented files count as one fragment
        if !f.is_fragmented() || f.is_excluded() {
            ctx.counters.fragments += 1;
        } else {
            ctx.counters.fragmented += 1;
            ctx.counters.fragments += f.fragments();
        }
    }
    ctx.files = FileTable::new(records);
    for (id, f) in ctx.files.iter() {
        ctx.blocks.add_file(id, &f.blockmap);
    }

    let c = &ctx.counters;
    info!(
        directories = c.directories,
        files = c.files,
        fragmented = c.fragmented,
        compressed = c.compressed,
        "file counters"
    );
    debug!(
        tiny = c.sizes.tiny,
        small = c.sizes.small,
        average = c.sizes.average,
        big = c.sizes.big,
        huge = c.sizes.huge,
        giant = c.sizes.giant,
        "file size histogram"
    );
    Ok(())
}

pub(crate) fn is_well_known_locked_file(f: &FileRecord) -> bool {
    let lower = f.path.to_lowercase();
    if lower.len() > 4
        && lower.as_bytes()[3] == b'$'
        && LOCKED_METAFILES.iter().any(|m| lower.contains(m))
    {
        return true;
    }
    let name = f.name.to_lowercase();
    LOCKED_SYSTEM_FILES.iter().any(|s| name.contains(s))
}

fn flag_well_known_locked_files(ctx: &mut JobContext<'_>) {
    let started = ctx.start_phase("searching for well known locked files");
    let candidates: Vec<FileId> = ctx
        .files
        .iter()
        .filter(|(_, f)| !f.blockmap.is_empty() && is_well_known_locked_file(f))
        .map(|(id, _)| id)
        .collect();

    let mut found = 0u64;
    for id in candidates {
        if planner::is_file_locked(ctx, id) {
            info!(path = %ctx.files[id].path, "locked file detected");
            found += 1;
        } else {
            debug!(path = %ctx.files[id].path, "file wasn't locked");
        }
    }
    info!(count = found, "locked files found");
    ctx.perf.searching += ctx.stop_phase("searching for well known locked files", started);
}

fn produce_list_of_fragmented_files(ctx: &mut JobContext<'_>) {
    let mut bad_fragments = 0;
    let mut bad_clusters = 0;
    ctx.fragmented = FragmentedIndex::new();
    for (id, f) in ctx.files.iter() {
        if f.is_fragmented() && !f.is_excluded() {
            ctx.fragmented.insert(id, f);
            bad_fragments += f.fragments();
            bad_clusters += f.clusters();
        }
    }
    ctx.counters.bad_fragments = bad_fragments;
    ctx.counters.bad_clusters = bad_clusters;
    info!(
        fragmented_files = ctx.fragmented.len(),
        fragments = ctx.counters.fragments,
        bad_clusters,
        "fragmented files list created"
    );
}

/// True when fragmentation is at or above the configured threshold.
pub fn check_fragmentation_level(ctx: &JobContext<'_>) -> bool {
    let fragmentation = percentage(ctx.counters.bad_clusters, ctx.counters.used_clusters);
    let threshold = ctx.options.fragmentation_threshold;
    if fragmentation < threshold {
        info!(
            "fragmentation is below the threshold: {fragmentation:.2}% < {threshold:.2}%"
        );
        return false;
    }
    info!("fragmentation is above the threshold: {fragmentation:.2}% >= {threshold:.2}%");
    true
}

fn check_requested_action(ctx: &JobContext<'_>) -> Result<(), JobError> {
    if ctx.kind != JobKind::Analysis && !ctx.caps.supports_move {
        error!(
            fs = %ctx.caps.kind,
            "cannot defragment or optimize volumes whose driver has no move primitive"
        );
        return Err(JobError::UnsupportedOperation {
            fs: ctx.caps.kind,
            job: ctx.kind,
        });
    }
    if ctx.caps.is_fat {
        info!("FAT directories cannot be moved entirely");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::BlockMap;

    fn context_menu(cut: &str) -> JobOptions {
        JobOptions {
            context_menu: true,
            cut_filter: PatternList::parse(cut),
            ..Default::default()
        }
    }

    #[test]
    fn scope_narrows_to_parent_directory() {
        assert_eq!(
            walk_scope(&context_menu("C:\\data\\file.bin"), FsKind::Fat32),
            WalkScope::Directory {
                path: "C:\\data".to_string(),
                recursive: false
            }
        );
        assert_eq!(
            walk_scope(&context_menu("C:\\data\\sub;C:\\data\\sub\\*"), FsKind::Fat32),
            WalkScope::Directory {
                path: "C:\\data".to_string(),
                recursive: true
            }
        );
    }

    #[test]
    fn scope_covers_volume_for_roots_and_ntfs() {
        assert_eq!(walk_scope(&context_menu("C:\\"), FsKind::Fat32), WalkScope::Volume);
        assert_eq!(walk_scope(&context_menu("C:\\*"), FsKind::Fat32), WalkScope::Volume);
        assert_eq!(walk_scope(&context_menu("C:\\file"), FsKind::Fat32), WalkScope::Volume);
        assert_eq!(
            walk_scope(&context_menu("C:\\data\\file"), FsKind::Ntfs),
            WalkScope::Volume
        );
        assert_eq!(
            walk_scope(&JobOptions::default(), FsKind::Fat32),
            WalkScope::Volume
        );
    }

    #[test]
    fn well_known_locked_files() {
        let f = |p: &str| FileRecord::new(p, BlockMap::from_extents(&[(1, 1)]));
        assert!(is_well_known_locked_file(&f("C:\\$LogFile")));
        assert!(is_well_known_locked_file(&f("C:\\$Extend\\$UsnJrnl:$J")));
        assert!(is_well_known_locked_file(&f("C:\\pagefile.sys")));
        assert!(is_well_known_locked_file(&f("D:\\deep\\HIBERFIL.SYS")));
        assert!(!is_well_known_locked_file(&f("C:\\data\\$LogFile")));
        assert!(!is_well_known_locked_file(&f("C:\\$MFT")));
    }
}

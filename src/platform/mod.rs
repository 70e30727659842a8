//! Host environment boundary.
//! The engine never touches on-disk bytes; everything it learns about a volume
//! and every cluster it moves goes through `VolumeHost`.
//!
//! Notes:
//! - `memory::MemoryVolume` is a complete in-memory host used by the tests and
//!   by the binary.
//! - A native host would wrap the OS volume bitmap, file walker and
//!   move-file primitive behind the same trait.

pub mod memory;

use crate::errors::{HostError, MoveFailure};
use crate::files::{BlockMap, FileRecord};
use crate::volume::VolumeGeometry;

pub use memory::{MemoryVolume, MemoryVolumeBuilder};

/// Which part of the volume a walk covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkScope {
    Volume,
    Directory { path: String, recursive: bool },
}

/// Verdict of the per-entry callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDecision {
    Keep,
    /// Drop the entry and, for directories, everything below it.
    SkipSubtree,
}

/// Callbacks driven by `VolumeHost::walk_files`.
pub trait WalkVisitor {
    fn on_entry(&mut self, file: &mut FileRecord) -> WalkDecision;

    fn on_progress(&mut self, _file: &FileRecord) {}

    fn should_terminate(&self) -> bool {
        false
    }
}

/// Opaque token returned by `open_for_move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveHandle(pub u64);

pub trait VolumeHost {
    fn volume_geometry(&self, volume: &str) -> Result<VolumeGeometry, HostError>;

    /// Free extents as `(lcn, length)`.
    fn free_regions(
        &self,
        volume: &str,
        partial_scan_allowed: bool,
    ) -> Result<Vec<(u64, u64)>, HostError>;

    /// Enumerate entries in `scope`. Entries the visitor skips are not returned.
    /// A walk cut short by the visitor returns what was collected so far.
    fn walk_files(
        &self,
        volume: &str,
        scope: &WalkScope,
        visitor: &mut dyn WalkVisitor,
    ) -> Result<Vec<FileRecord>, HostError>;

    fn move_clusters(
        &mut self,
        file: &FileRecord,
        start_vcn: u64,
        length: u64,
        target_lcn: u64,
    ) -> Result<(), MoveFailure>;

    fn open_for_move(&mut self, file: &FileRecord) -> Result<MoveHandle, HostError>;

    fn close(&mut self, handle: MoveHandle);

    /// The file's current map, when the host can report it after a move.
    fn refresh_block_map(&self, _file: &FileRecord) -> Option<BlockMap> {
        None
    }
}

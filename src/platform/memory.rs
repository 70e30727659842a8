//! In-memory volume host.
//! - Free extents are derived from the files' maps and reserved extents, so
//!   the host always reflects the real allocation after every move.
//! - `move_clusters` only accepts targets that are entirely free, like the
//!   native move primitive.
//! - Layouts can be described in XML (see `from_layout_str`).

use anyhow::{Context, Result};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

use super::{MoveHandle, VolumeHost, WalkDecision, WalkScope, WalkVisitor};
use crate::errors::{HostError, MoveFailure};
use crate::files::{BlockMap, FileAttributes, FileFlags, FileRecord};
use crate::volume::{Extent, NtfsFacts, VolumeGeometry};

#[derive(Debug, Clone)]
struct MemFile {
    record: FileRecord,
    locked: bool,
    failing: bool,
}

/// One accepted call to `move_clusters`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveLogEntry {
    pub path: String,
    pub start_vcn: u64,
    pub length: u64,
    pub target_lcn: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryVolume {
    name: String,
    geometry: VolumeGeometry,
    reserved: Vec<Extent>,
    /// Ranges some other writer grabs right before our next move into them.
    collisions: Vec<Extent>,
    files: Vec<MemFile>,
    fail_walk: bool,
    next_handle: u64,
    open_handles: usize,
    moves: Vec<MoveLogEntry>,
}

impl MemoryVolume {
    pub fn builder(name: &str, total_clusters: u64, bytes_per_cluster: u64) -> MemoryVolumeBuilder {
        MemoryVolumeBuilder {
            volume: MemoryVolume {
                name: name.to_string(),
                geometry: VolumeGeometry {
                    total_clusters,
                    bytes_per_cluster,
                    device_capacity: total_clusters.saturating_mul(bytes_per_cluster),
                    fs_name: "NTFS".to_string(),
                    ..Default::default()
                },
                reserved: Vec::new(),
                collisions: Vec::new(),
                files: Vec::new(),
                fail_walk: false,
                next_handle: 1,
                open_handles: 0,
                moves: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.geometry.bytes_per_cluster
    }

    pub fn total_clusters(&self) -> u64 {
        self.geometry.total_clusters
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().map(|f| &f.record)
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.position(path).map(|i| &self.files[i].record)
    }

    pub fn moves(&self) -> &[MoveLogEntry] {
        &self.moves
    }

    /// Handles opened with `open_for_move` and not closed yet.
    pub fn open_handle_count(&self) -> usize {
        self.open_handles
    }

    /// Clusters held by files and reserved extents.
    pub fn allocated_clusters(&self) -> u64 {
        self.allocation().iter().map(|e| e.length).sum()
    }

    pub fn free_clusters(&self) -> u64 {
        self.free_extents().iter().map(|e| e.length).sum()
    }

    /// Load a layout from an XML file.
    pub fn from_layout_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read volume layout '{}'", path.display()))?;
        Self::from_layout_str(&contents)
            .with_context(|| format!("parse volume layout '{}'", path.display()))
    }

    /// Parse a layout such as:
    ///
    /// ```xml
    /// <volume>
    ///   <name>C:</name>
    ///   <fs>NTFS</fs>
    ///   <total_clusters>1000</total_clusters>
    ///   <bytes_per_cluster>4096</bytes_per_cluster>
    ///   <file path="C:\a.bin" locked="true">
    ///     <extent lcn="10" length="5"/>
    ///   </file>
    /// </volume>
    /// ```
    pub fn from_layout_str(xml: &str) -> Result<Self> {
        let layout: XmlVolume = from_xml_str(xml).context("deserialize volume layout")?;
        if layout.total_clusters == 0 || layout.bytes_per_cluster == 0 {
            anyhow::bail!("volume layout needs nonzero total_clusters and bytes_per_cluster");
        }
        let mut b = MemoryVolume::builder(
            layout.name.trim(),
            layout.total_clusters,
            layout.bytes_per_cluster,
        );
        if let Some(fs) = layout.fs {
            b = b.fs_name(fs.trim());
        }
        if let Some(cap) = layout.device_capacity {
            b = b.device_capacity(cap);
        }
        b = b.dirty(layout.dirty.unwrap_or(false));
        if let Some(facts) = layout.ntfs {
            b = b.ntfs(facts);
        }
        for r in layout.reserved {
            b = b.reserved(r.lcn, r.length);
        }
        for f in layout.files {
            let extents: Vec<(u64, u64)> = f.extents.iter().map(|e| (e.lcn, e.length)).collect();
            let mut record = FileRecord::new(f.path.trim(), BlockMap::from_extents(&extents));
            record.attributes.set(FileAttributes::DIRECTORY, f.directory);
            record.attributes.set(FileAttributes::COMPRESSED, f.compressed);
            record.attributes.set(FileAttributes::TEMPORARY, f.temporary);
            record.creation_time = f.created;
            record.modification_time = f.modified;
            record.access_time = f.accessed;
            b = b.entry(record);
            if f.locked {
                b = b.locked(f.path.trim());
            }
        }
        Ok(b.build())
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.files
            .iter()
            .position(|f| f.record.path.eq_ignore_ascii_case(path))
    }

    fn check_volume(&self, volume: &str) -> Result<(), HostError> {
        if volume.eq_ignore_ascii_case(&self.name) {
            Ok(())
        } else {
            Err(HostError::NotReady)
        }
    }

    /// Every allocated extent, sorted by LCN.
    fn allocation(&self) -> Vec<Extent> {
        let mut all: Vec<Extent> = self
            .files
            .iter()
            .flat_map(|f| f.record.blockmap.extents())
            .chain(self.reserved.iter().copied())
            .collect();
        all.sort_by_key(|e| e.lcn);
        all
    }

    fn free_extents(&self) -> Vec<Extent> {
        let total = self.geometry.total_clusters;
        let mut free = Vec::new();
        let mut cursor = 0u64;
        for ext in self.allocation() {
            if ext.lcn > cursor {
                free.push(Extent::new(cursor, ext.lcn.min(total) - cursor));
            }
            cursor = cursor.max(ext.end());
            if cursor >= total {
                break;
            }
        }
        if cursor < total {
            free.push(Extent::new(cursor, total - cursor));
        }
        free
    }

    fn is_range_free(&self, lcn: u64, length: u64) -> bool {
        let end = lcn.saturating_add(length);
        end <= self.geometry.total_clusters
            && self
                .allocation()
                .iter()
                .all(|e| e.end() <= lcn || e.lcn >= end)
    }
}

fn in_scope(scope: &WalkScope, lower_path: &str) -> bool {
    match scope {
        WalkScope::Volume => true,
        WalkScope::Directory { path, recursive } => {
            let prefix = format!("{}\\", path.trim_end_matches('\\').to_lowercase());
            match lower_path.strip_prefix(&prefix) {
                Some(rest) => !rest.is_empty() && (*recursive || !rest.contains('\\')),
                None => false,
            }
        }
    }
}

impl VolumeHost for MemoryVolume {
    fn volume_geometry(&self, volume: &str) -> Result<VolumeGeometry, HostError> {
        self.check_volume(volume)?;
        let mut geometry = self.geometry.clone();
        geometry.free_bytes = self.free_clusters().saturating_mul(geometry.bytes_per_cluster);
        Ok(geometry)
    }

    fn free_regions(
        &self,
        volume: &str,
        _partial_scan_allowed: bool,
    ) -> Result<Vec<(u64, u64)>, HostError> {
        self.check_volume(volume)?;
        Ok(self
            .free_extents()
            .into_iter()
            .map(|e| (e.lcn, e.length))
            .collect())
    }

    fn walk_files(
        &self,
        volume: &str,
        scope: &WalkScope,
        visitor: &mut dyn WalkVisitor,
    ) -> Result<Vec<FileRecord>, HostError> {
        self.check_volume(volume)?;
        if self.fail_walk {
            return Err(HostError::Other("file walk failed".to_string()));
        }
        let mut order: Vec<(String, &MemFile)> = self
            .files
            .iter()
            .map(|f| (f.record.path.to_lowercase(), f))
            .collect();
        order.sort_by(|a, b| a.0.cmp(&b.0));

        let mut skipped: Vec<String> = Vec::new();
        let mut out = Vec::new();
        for (lower, f) in order {
            if visitor.should_terminate() {
                debug!(collected = out.len(), "file walk interrupted");
                break;
            }
            if !in_scope(scope, &lower) || skipped.iter().any(|p| lower.starts_with(p.as_str())) {
                continue;
            }
            let mut record = f.record.clone();
            record.flags = FileFlags::empty();
            match visitor.on_entry(&mut record) {
                WalkDecision::Keep => {
                    visitor.on_progress(&record);
                    out.push(record);
                }
                WalkDecision::SkipSubtree => {
                    if f.record.is_directory() && !lower.is_empty() {
                        skipped.push(format!("{lower}\\"));
                    }
                }
            }
        }
        Ok(out)
    }

    fn move_clusters(
        &mut self,
        file: &FileRecord,
        start_vcn: u64,
        length: u64,
        target_lcn: u64,
    ) -> Result<(), MoveFailure> {
        let idx = self
            .position(&file.path)
            .ok_or_else(|| MoveFailure::Other(format!("no such file: {}", file.path)))?;
        if self.files[idx].locked {
            return Err(MoveFailure::Locked);
        }
        if self.files[idx].failing {
            return Err(MoveFailure::Other("device rejected the request".to_string()));
        }
        if !self.is_range_free(target_lcn, length) {
            return Err(MoveFailure::AlreadyInUse);
        }
        let end = target_lcn.saturating_add(length);
        if let Some(i) = self
            .collisions
            .iter()
            .position(|c| c.lcn < end && target_lcn < c.end())
        {
            self.collisions.remove(i);
            debug!(path = %file.path, target_lcn, length, "move target taken by another writer");
            return Err(MoveFailure::AlreadyInUse);
        }
        let moved = self.files[idx]
            .record
            .blockmap
            .relocate(start_vcn, length, target_lcn)
            .ok_or_else(|| MoveFailure::Other("range lies outside the file".to_string()))?;
        self.files[idx].record.blockmap = moved;
        trace!(path = %file.path, start_vcn, length, target_lcn, "clusters moved");
        self.moves.push(MoveLogEntry {
            path: file.path.clone(),
            start_vcn,
            length,
            target_lcn,
        });
        Ok(())
    }

    fn open_for_move(&mut self, file: &FileRecord) -> Result<MoveHandle, HostError> {
        let locked = self
            .position(&file.path)
            .map(|i| self.files[i].locked)
            .unwrap_or(false);
        if locked {
            return Err(HostError::Locked);
        }
        let handle = MoveHandle(self.next_handle);
        self.next_handle += 1;
        self.open_handles += 1;
        Ok(handle)
    }

    fn close(&mut self, _handle: MoveHandle) {
        self.open_handles = self.open_handles.saturating_sub(1);
    }

    fn refresh_block_map(&self, file: &FileRecord) -> Option<BlockMap> {
        self.file(&file.path).map(|f| f.blockmap.clone())
    }
}

/// Fluent construction of a `MemoryVolume`.
#[derive(Debug, Clone)]
pub struct MemoryVolumeBuilder {
    volume: MemoryVolume,
}

impl MemoryVolumeBuilder {
    pub fn fs_name(mut self, name: &str) -> Self {
        self.volume.geometry.fs_name = name.to_string();
        self
    }

    pub fn dirty(mut self, dirty: bool) -> Self {
        self.volume.geometry.dirty = dirty;
        self
    }

    pub fn device_capacity(mut self, bytes: u64) -> Self {
        self.volume.geometry.device_capacity = bytes;
        self
    }

    pub fn ntfs(mut self, facts: NtfsFacts) -> Self {
        self.volume.geometry.ntfs = Some(facts);
        self
    }

    /// Clusters allocated to nothing the walker reports (boot sector, metadata).
    pub fn reserved(mut self, lcn: u64, length: u64) -> Self {
        self.volume.reserved.push(Extent::new(lcn, length));
        self
    }

    pub fn file(self, path: &str, extents: &[(u64, u64)]) -> Self {
        self.entry(FileRecord::new(path, BlockMap::from_extents(extents)))
    }

    pub fn directory(self, path: &str, extents: &[(u64, u64)]) -> Self {
        let mut record = FileRecord::new(path, BlockMap::from_extents(extents));
        record.attributes.insert(FileAttributes::DIRECTORY);
        self.entry(record)
    }

    pub fn entry(mut self, record: FileRecord) -> Self {
        self.volume.files.push(MemFile {
            record,
            locked: false,
            failing: false,
        });
        self
    }

    /// Refuse opens and moves of `path`.
    pub fn locked(mut self, path: &str) -> Self {
        if let Some(i) = self.volume.position(path) {
            self.volume.files[i].locked = true;
        }
        self
    }

    /// Fail every move of `path` with a hard error.
    pub fn failing(mut self, path: &str) -> Self {
        if let Some(i) = self.volume.position(path) {
            self.volume.files[i].failing = true;
        }
        self
    }

    /// Refuse the next move into `[lcn, lcn + length)` as already in use,
    /// then let later moves through.
    pub fn collision(mut self, lcn: u64, length: u64) -> Self {
        self.volume.collisions.push(Extent::new(lcn, length));
        self
    }

    pub fn failing_walk(mut self) -> Self {
        self.volume.fail_walk = true;
        self
    }

    pub fn build(self) -> MemoryVolume {
        self.volume
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "volume")]
#[serde(deny_unknown_fields)]
struct XmlVolume {
    name: String,
    fs: Option<String>,
    total_clusters: u64,
    bytes_per_cluster: u64,
    device_capacity: Option<u64>,
    dirty: Option<bool>,
    ntfs: Option<NtfsFacts>,
    #[serde(default)]
    reserved: Vec<XmlExtent>,
    #[serde(default, rename = "file")]
    files: Vec<XmlFile>,
}

#[derive(Debug, Deserialize)]
struct XmlExtent {
    #[serde(rename = "@lcn")]
    lcn: u64,
    #[serde(rename = "@length")]
    length: u64,
}

#[derive(Debug, Deserialize)]
struct XmlFile {
    #[serde(rename = "@path")]
    path: String,
    #[serde(rename = "@directory", default)]
    directory: bool,
    #[serde(rename = "@compressed", default)]
    compressed: bool,
    #[serde(rename = "@temporary", default)]
    temporary: bool,
    #[serde(rename = "@locked", default)]
    locked: bool,
    #[serde(rename = "@created", default)]
    created: i64,
    #[serde(rename = "@modified", default)]
    modified: i64,
    #[serde(rename = "@accessed", default)]
    accessed: i64,
    #[serde(default, rename = "extent")]
    extents: Vec<XmlExtent>,
}

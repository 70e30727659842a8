//! Volume geometry and file system facts.
//! - `VolumeGeometry` is what the host reports at the start of every job.
//! - `FsKind::classify` maps a file system name onto a known kind.
//! - `FsCapabilities` is the small fact sheet the planner consults instead of
//!   knowing about on-disk record formats.

use serde::{Deserialize, Serialize};
use std::fmt;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Capacity brackets for the burst size: (exclusive upper capacity bound, bytes per burst).
const BURST_TABLE: [(u64, u64); 5] = [
    (20 * GIB, 256 * KIB),
    (100 * GIB, 4 * MIB),
    (250 * GIB, 8 * MIB),
    (TIB, 16 * MIB),
    (2 * TIB, 32 * MIB),
];
const BURST_MAX: u64 = 64 * MIB;

/// NTFS-specific facts taken from the volume header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NtfsFacts {
    pub mft_start_lcn: u64,
    pub mft_valid_data_length: u64,
    pub mft_zone_start: u64,
    /// Inclusive.
    pub mft_zone_end: u64,
    pub mft_mirror_start_lcn: u64,
    pub bytes_per_file_record: u64,
}

/// Geometry of a volume as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeGeometry {
    pub total_clusters: u64,
    pub bytes_per_cluster: u64,
    pub free_bytes: u64,
    pub device_capacity: u64,
    pub dirty: bool,
    /// File system name as the host reports it, e.g. "NTFS" or "fat".
    pub fs_name: String,
    pub ntfs: Option<NtfsFacts>,
}

impl VolumeGeometry {
    pub fn total_bytes(&self) -> u64 {
        self.total_clusters.saturating_mul(self.bytes_per_cluster)
    }

    pub fn used_clusters(&self) -> u64 {
        if self.bytes_per_cluster == 0 {
            return self.total_clusters;
        }
        self.total_clusters
            .saturating_sub(self.free_bytes / self.bytes_per_cluster)
    }
}

/// Recognized file system kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum FsKind {
    Ntfs,
    Fat12,
    Fat16,
    Fat32,
    ExFat,
    Udf,
    #[default]
    Unknown,
}

/// Name table; "FAT" is an alias of FAT16.
const FS_TABLE: [(&str, FsKind); 7] = [
    ("NTFS", FsKind::Ntfs),
    ("FAT12", FsKind::Fat12),
    ("FAT", FsKind::Fat16),
    ("FAT16", FsKind::Fat16),
    ("FAT32", FsKind::Fat32),
    ("EXFAT", FsKind::ExFat),
    ("UDF", FsKind::Udf),
];

impl FsKind {
    /// Case-insensitive match against the fixed name table.
    pub fn classify(name: &str) -> Self {
        let name = name.trim();
        FS_TABLE
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
            .unwrap_or(FsKind::Unknown)
    }

    pub fn is_fat(self) -> bool {
        matches!(
            self,
            FsKind::Fat12 | FsKind::Fat16 | FsKind::Fat32 | FsKind::ExFat
        )
    }

    pub fn capabilities(self) -> FsCapabilities {
        FsCapabilities {
            kind: self,
            is_fat: self.is_fat(),
            is_ntfs: self == FsKind::Ntfs,
            supports_move: self != FsKind::Udf,
            directories_movable_entirely: !self.is_fat(),
            has_mft: self == FsKind::Ntfs,
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsKind::Ntfs => "NTFS",
            FsKind::Fat12 => "FAT12",
            FsKind::Fat16 => "FAT16",
            FsKind::Fat32 => "FAT32",
            FsKind::ExFat => "exFAT",
            FsKind::Udf => "UDF",
            FsKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What the planner may assume about the file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsCapabilities {
    pub kind: FsKind,
    pub is_fat: bool,
    pub is_ntfs: bool,
    /// False when the host's move primitive is unavailable (UDF).
    pub supports_move: bool,
    /// FAT directories keep their first cluster in place.
    pub directories_movable_entirely: bool,
    pub has_mft: bool,
}

/// Half-open cluster extent `[lcn, lcn + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Extent {
    pub lcn: u64,
    pub length: u64,
}

impl Extent {
    pub fn new(lcn: u64, length: u64) -> Self {
        Self { lcn, length }
    }

    pub fn end(&self) -> u64 {
        self.lcn.saturating_add(self.length)
    }

    pub fn contains(&self, lcn: u64) -> bool {
        lcn >= self.lcn && lcn < self.end()
    }
}

/// MFT, MFT zone and MFT mirror positions derived during analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MftLayout {
    pub mft: Extent,
    pub zone: Option<Extent>,
    pub mirror: Extent,
}

impl MftLayout {
    pub fn from_facts(facts: &NtfsFacts, bytes_per_cluster: u64, total_clusters: u64) -> Self {
        let mft_len = if bytes_per_cluster > 0 {
            facts.mft_valid_data_length / bytes_per_cluster
        } else {
            0
        };
        // a header without zone facts reports no zone
        let has_zone = (facts.mft_zone_start != 0 || facts.mft_zone_end != 0)
            && facts.mft_zone_end >= facts.mft_zone_start;
        let zone_len = facts
            .mft_zone_end
            .saturating_sub(facts.mft_zone_start)
            .saturating_add(1);
        let zone = Extent::new(facts.mft_zone_start, zone_len);
        let zone = (has_zone && zone.lcn < total_clusters && zone.end() <= total_clusters)
            .then_some(zone);

        let mirror_size = facts.bytes_per_file_record.saturating_mul(4);
        let mirror_len = if bytes_per_cluster > 0 && mirror_size > bytes_per_cluster {
            mirror_size.div_ceil(bytes_per_cluster)
        } else {
            1
        };

        Self {
            mft: Extent::new(facts.mft_start_lcn, mft_len),
            zone,
            mirror: Extent::new(facts.mft_mirror_start_lcn, mirror_len),
        }
    }
}

/// Bytes moved in one uninterruptible burst for a device of `capacity` bytes.
pub fn burst_bytes(capacity: u64) -> u64 {
    BURST_TABLE
        .iter()
        .find(|(limit, _)| capacity < *limit)
        .map(|(_, bytes)| *bytes)
        .unwrap_or(BURST_MAX)
}

/// Clusters moved per burst; never zero.
pub fn clusters_at_once(capacity: u64, bytes_per_cluster: u64) -> u64 {
    if bytes_per_cluster == 0 {
        return 1;
    }
    (burst_bytes(capacity) / bytes_per_cluster).max(1)
}

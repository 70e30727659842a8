//! Progress counters and the snapshot handed to progress callbacks.

use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::utils::format_bytes;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Operation {
    #[default]
    Analysis,
    Defragmentation,
    Optimization,
}

/// Histogram of file sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSizeCounters {
    pub tiny: u64,
    pub small: u64,
    pub average: u64,
    pub big: u64,
    pub huge: u64,
    pub giant: u64,
}

impl FileSizeCounters {
    pub fn record(&mut self, bytes: u64) {
        let slot = if bytes >= 128 * MIB {
            &mut self.giant
        } else if bytes >= 16 * MIB {
            &mut self.huge
        } else if bytes >= MIB {
            &mut self.big
        } else if bytes >= 100 * KIB {
            &mut self.average
        } else if bytes >= 10 * KIB {
            &mut self.small
        } else {
            &mut self.tiny
        };
        *slot += 1;
    }
}

/// Counters mutated by the component doing the corresponding work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressCounters {
    pub clusters_to_process: u64,
    pub processed_clusters: u64,
    pub moved_clusters: u64,
    pub total_moves: u64,
    pub failed_moves: u64,
    /// Files found locked while planning moves.
    pub locked_files: u64,
    pub files: u64,
    pub directories: u64,
    pub compressed: u64,
    pub fragmented: u64,
    pub fragments: u64,
    pub bad_fragments: u64,
    pub bad_clusters: u64,
    pub used_clusters: u64,
    pub total_space: u64,
    pub free_space: u64,
    pub mft_size: u64,
    pub pass_number: u32,
    pub sizes: FileSizeCounters,
}

impl ProgressCounters {
    /// Reset everything the analyzer recomputes. Move tallies and the pass
    /// number span the whole job; lock verdicts are checked again after each
    /// analysis, so their count starts over.
    pub fn reset_statistics(&mut self) {
        let kept = Self {
            moved_clusters: self.moved_clusters,
            total_moves: self.total_moves,
            failed_moves: self.failed_moves,
            pass_number: self.pass_number,
            ..Self::default()
        };
        *self = kept;
    }
}

/// Wall-clock time spent per activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerfCounters {
    pub overall: Duration,
    pub analysis: Duration,
    pub searching: Duration,
    pub moving: Duration,
    pub temp_space_release: Duration,
}

impl PerfCounters {
    pub fn log(&self, volume: &str) {
        let share = |d: Duration| percentage(d.as_micros() as u64, self.overall.as_micros() as u64);
        info!(
            volume,
            overall_ms = self.overall.as_millis() as u64,
            "volume processing completed"
        );
        for (name, d) in [
            ("analysis", self.analysis),
            ("searching", self.searching),
            ("moving", self.moving),
            ("releasing temp space", self.temp_space_release),
        ] {
            info!(
                counter = name,
                ms = d.as_millis() as u64,
                share = format!("{:.2} %", share(d)),
                "performance counter"
            );
        }
    }
}

/// Snapshot passed to progress callbacks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressInfo {
    pub operation: Operation,
    pub percentage: f64,
    pub counters: ProgressCounters,
    pub cancelled: bool,
}

impl ProgressInfo {
    pub fn summary(&self, bytes_per_cluster: u64) -> String {
        format!(
            "{:?}: {:.2}% | pass {} | {} moves | {} moved",
            self.operation,
            self.percentage,
            self.counters.pass_number,
            self.counters.total_moves,
            format_bytes(self.counters.moved_clusters.saturating_mul(bytes_per_cluster)),
        )
    }
}

pub fn percentage(x: u64, y: u64) -> f64 {
    if y == 0 {
        0.0
    } else {
        x as f64 / y as f64 * 100.0
    }
}

//! Core library for `defrag_core`.
//!
//! Plans the relocation of file clusters on a block-addressed volume:
//! analysis of the volume layout, defragmentation, and the optimizer's
//! placement heuristics. The host environment (volume bitmap, file walker
//! and the move primitive) sits behind `platform::VolumeHost`.
//!
//! Start with `run_job`, or build a `JobContext` and call `run` on it.

pub mod analyze;
pub mod block_index;
pub mod config;
pub mod defrag;
pub mod errors;
pub mod files;
pub mod filter;
pub mod fragmented;
pub mod free_space;
pub mod job;
pub mod optimizer;
pub mod output;
pub mod planner;
pub mod platform;
pub mod progress;
pub mod shutdown;
pub mod utils;
pub mod volume;

pub use config::{
    Config, JobOptions, LogLevel, SortCriterion, SortOrder, default_config_path, default_log_path,
    load_config,
};
pub use errors::{CleanupError, ConfigError, HostError, JobError, MoveError, MoveFailure};
pub use files::{Block, BlockMap, FileAttributes, FileFlags, FileId, FileRecord, FileTable};
pub use free_space::FreeSpace;
pub use job::{JobContext, JobKind, JobOutcome, JobStatus, run_job};
pub use planner::Compaction;
pub use platform::{MemoryVolume, VolumeHost};
pub use progress::{Operation, ProgressCounters, ProgressInfo};
pub use shutdown::{NeverTerminate, ShutdownFlag, Terminator};
pub use volume::{Extent, FsCapabilities, FsKind, VolumeGeometry};

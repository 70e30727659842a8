//! Job state and the job entry point.
//!
//! `JobContext` owns everything one job works on: geometry, the file table,
//! the three indices, the options and the counters. It is created fresh for
//! every job and passed by reference to every component; nothing outlives it.
//!
//! Notes:
//! - Only volume-level preconditions end a job with an error. Per-file
//!   failures are absorbed into counters and file flags.
//! - Cancellation is reported as success-so-far with `cancelled` set.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::block_index::BlockIndex;
use crate::config::JobOptions;
use crate::errors::JobError;
use crate::files::FileTable;
use crate::fragmented::FragmentedIndex;
use crate::free_space::FreeSpace;
use crate::platform::VolumeHost;
use crate::progress::{Operation, PerfCounters, ProgressCounters, ProgressInfo, percentage};
use crate::shutdown::Terminator;
use crate::volume::{FsCapabilities, MftLayout, VolumeGeometry};
use crate::{analyze, defrag, optimizer};

/// Kinds of work the engine can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Analysis,
    Defragmentation,
    QuickOptimization,
    FullOptimization,
    MftOptimization,
    SingleFileMoveFront,
    SingleFileMoveEnd,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::Analysis => "analysis",
            JobKind::Defragmentation => "defragmentation",
            JobKind::QuickOptimization => "quick optimization",
            JobKind::FullOptimization => "full optimization",
            JobKind::MftOptimization => "MFT optimization",
            JobKind::SingleFileMoveFront => "move to front",
            JobKind::SingleFileMoveEnd => "move to end",
        };
        f.write_str(s)
    }
}

impl FromStr for JobKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "analyze" | "analysis" => Ok(JobKind::Analysis),
            "defrag" | "defragment" | "defragmentation" => Ok(JobKind::Defragmentation),
            "quick-optimize" | "quick-optimization" => Ok(JobKind::QuickOptimization),
            "full-optimize" | "full-optimization" => Ok(JobKind::FullOptimization),
            "optimize-mft" | "mft-optimization" => Ok(JobKind::MftOptimization),
            "move-front" | "move-to-front" => Ok(JobKind::SingleFileMoveFront),
            "move-end" | "move-to-end" => Ok(JobKind::SingleFileMoveEnd),
            _ => Err(format!("unknown job kind: '{s}'")),
        }
    }
}

/// Terminal status handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    /// Finished, but some files were locked or some moves failed.
    PartiallySucceeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::PartiallySucceeded => "partially succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a finished job reports.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub kind: JobKind,
    pub status: JobStatus,
    pub error: Option<JobError>,
    pub cancelled: bool,
    /// How many times the job ran (more than one with the repeat flag).
    pub runs: u32,
    pub counters: ProgressCounters,
    pub geometry: VolumeGeometry,
    pub fragmentation: f64,
}

impl JobOutcome {
    /// Process exit code: 0 on success, the error's code on failure.
    pub fn exit_code(&self) -> i32 {
        match &self.error {
            Some(e) => e.code(),
            None if self.status == JobStatus::PartiallySucceeded => 2,
            None => 0,
        }
    }
}

pub type ProgressCallback<'a> = &'a mut dyn FnMut(&ProgressInfo);

/// Explicit state of one job.
pub struct JobContext<'a> {
    pub host: &'a mut dyn VolumeHost,
    pub volume: String,
    pub kind: JobKind,
    pub options: JobOptions,
    terminator: &'a dyn Terminator,
    progress: Option<ProgressCallback<'a>>,
    pub geometry: VolumeGeometry,
    pub caps: FsCapabilities,
    pub clusters_at_once: u64,
    pub mft: Option<MftLayout>,
    pub files: FileTable,
    pub blocks: BlockIndex,
    pub free: FreeSpace,
    pub fragmented: FragmentedIndex,
    pub counters: ProgressCounters,
    pub operation: Operation,
    pub perf: PerfCounters,
    cancelled: bool,
}

impl<'a> JobContext<'a> {
    pub fn new(
        host: &'a mut dyn VolumeHost,
        volume: &str,
        kind: JobKind,
        options: JobOptions,
        terminator: &'a dyn Terminator,
    ) -> Self {
        Self {
            host,
            volume: volume.to_string(),
            kind,
            options,
            terminator,
            progress: None,
            geometry: VolumeGeometry::default(),
            caps: FsCapabilities::default(),
            clusters_at_once: 1,
            mft: None,
            files: FileTable::default(),
            blocks: BlockIndex::new(),
            free: FreeSpace::new(),
            fragmented: FragmentedIndex::new(),
            counters: ProgressCounters::default(),
            operation: Operation::Analysis,
            perf: PerfCounters::default(),
            cancelled: false,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback<'a>) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.geometry.bytes_per_cluster
    }

    /// Poll the terminator. Once it fires the job stays cancelled.
    pub fn should_terminate(&mut self) -> bool {
        if !self.cancelled && self.terminator.should_terminate() {
            info!(volume = %self.volume, "termination requested");
            self.cancelled = true;
        }
        self.cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn terminator(&self) -> &'a dyn Terminator {
        self.terminator
    }

    pub(crate) fn start_phase(&self, phase: &str) -> Instant {
        info!("{phase} of {}: started", self.volume);
        Instant::now()
    }

    pub(crate) fn stop_phase(&self, phase: &str, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        info!(
            "{phase} of {}: completed in {} ms",
            self.volume,
            elapsed.as_millis()
        );
        elapsed
    }

    pub fn snapshot(&self) -> ProgressInfo {
        let pct = percentage(
            self.counters.processed_clusters,
            self.counters.clusters_to_process,
        )
        .min(100.0);
        ProgressInfo {
            operation: self.operation,
            percentage: pct,
            counters: self.counters.clone(),
            cancelled: self.cancelled,
        }
    }

    /// Hand a snapshot to the progress callback, if any.
    pub fn notify_progress(&mut self) {
        if self.progress.is_none() {
            return;
        }
        let info = self.snapshot();
        if let Some(cb) = self.progress.as_mut() {
            cb(&info);
        }
    }

    /// `bad_clusters / used_clusters` in percent.
    pub fn fragmentation(&self) -> f64 {
        percentage(self.counters.bad_clusters, self.counters.used_clusters)
    }

    /// Run the job, repeating it while the repeat flag is set and the last run
    /// moved something.
    pub fn run(&mut self) -> JobOutcome {
        let started = Instant::now();
        info!(volume = %self.volume, job = %self.kind, "job started");

        let mut runs = 0;
        let result = match self.options.validate() {
            Err(e) => Err(JobError::from(e)),
            Ok(()) => loop {
                runs += 1;
                let moves_before = self.counters.total_moves;
                let r = self.run_once();
                let repeat = r.is_ok()
                    && self.options.repeat
                    && self.kind != JobKind::Analysis
                    && !self.cancelled
                    && self.counters.total_moves > moves_before;
                if !repeat {
                    break r;
                }
                info!(volume = %self.volume, run = runs + 1, "repeating job");
            },
        };

        self.perf.overall = started.elapsed();
        self.perf.log(&self.volume);
        self.notify_progress();

        let status = match &result {
            Err(e) => {
                error!(volume = %self.volume, job = %self.kind, code = e.code(), "job failed: {e}");
                JobStatus::Failed
            }
            Ok(()) if self.counters.failed_moves > 0 || self.counters.locked_files > 0 => {
                warn!(
                    failed_moves = self.counters.failed_moves,
                    locked_files = self.counters.locked_files,
                    "job partially succeeded"
                );
                JobStatus::PartiallySucceeded
            }
            Ok(()) => JobStatus::Succeeded,
        };
        info!(volume = %self.volume, job = %self.kind, %status, cancelled = self.cancelled, "job finished");

        JobOutcome {
            kind: self.kind,
            status,
            error: result.err(),
            cancelled: self.cancelled,
            runs,
            counters: self.counters.clone(),
            geometry: self.geometry.clone(),
            fragmentation: self.fragmentation(),
        }
    }

    fn run_once(&mut self) -> Result<(), JobError> {
        match self.kind {
            JobKind::Analysis => analyze::analyze(self),
            JobKind::Defragmentation => defrag::defragment_job(self),
            JobKind::QuickOptimization | JobKind::FullOptimization => optimizer::optimize(self),
            JobKind::MftOptimization => optimizer::optimize_mft(self),
            JobKind::SingleFileMoveFront => defrag::move_files_job(self, defrag::Placement::Front),
            JobKind::SingleFileMoveEnd => defrag::move_files_job(self, defrag::Placement::End),
        }
    }
}

/// Run one job against `host` and report how it ended.
pub fn run_job(
    host: &mut dyn VolumeHost,
    volume: &str,
    kind: JobKind,
    options: JobOptions,
    terminator: &dyn Terminator,
    progress: Option<&mut dyn FnMut(&ProgressInfo)>,
) -> JobOutcome {
    let mut ctx = JobContext::new(host, volume, kind, options, terminator);
    if let Some(cb) = progress {
        ctx = ctx.with_progress(cb);
    }
    ctx.run()
}

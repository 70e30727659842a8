//! Typed error definitions for defrag_core.
//! Job-level failures abort the whole job; move-level failures are absorbed
//! per file and recorded in the counters and file flags.

use thiserror::Error;

use crate::job::JobKind;
use crate::volume::FsKind;

/// Failures reported by the host environment (the volume boundary).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("volume is not ready")]
    NotReady,

    #[error("access to the volume was denied")]
    AccessDenied,

    #[error("file is locked by another process")]
    Locked,

    #[error("host error: {0}")]
    Other(String),
}

/// Outcome of a single call to the host's cluster move primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveFailure {
    #[error("target clusters are already in use")]
    AlreadyInUse,

    #[error("file is locked")]
    Locked,

    #[error("move rejected: {0}")]
    Other(String),
}

/// Errors that abort the whole job.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("volume is dirty; run a file system check first")]
    DirtyVolume,

    #[error("invalid volume geometry: {total_clusters} clusters of {bytes_per_cluster} bytes")]
    InvalidGeometry {
        total_clusters: u64,
        bytes_per_cluster: u64,
    },

    #[error("{job} is not supported on {fs} volumes")]
    UnsupportedOperation { fs: FsKind, job: JobKind },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("file enumeration failed")]
    FileEnumeration,

    #[error("invalid job options: {0}")]
    InvalidOptions(#[from] ConfigError),

    #[error("cannot find the $MFT file")]
    MftNotFound,
}

impl JobError {
    /// Stable numeric code for logs and exit statuses.
    pub fn code(&self) -> i32 {
        match self {
            JobError::DirtyVolume => 10,
            JobError::InvalidGeometry { .. } => 11,
            JobError::UnsupportedOperation { .. } => 12,
            JobError::Host(_) => 13,
            JobError::FileEnumeration => 14,
            JobError::InvalidOptions(_) => 15,
            JobError::MftNotFound => 16,
        }
    }
}

/// Errors of a single relocation request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    /// Retryable: pick another target and continue.
    #[error("target region is already in use")]
    TargetInUse,

    #[error("file is locked")]
    Locked,

    #[error("not enough free space")]
    InsufficientSpace,

    #[error("move failed: {0}")]
    Failed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl MoveError {
    pub fn code(&self) -> i32 {
        match self {
            MoveError::TargetInUse => 20,
            MoveError::Locked => 21,
            MoveError::InsufficientSpace => 22,
            MoveError::Failed(_) => 23,
            MoveError::Cancelled => 24,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, MoveError::TargetInUse)
    }
}

impl From<MoveFailure> for MoveError {
    fn from(f: MoveFailure) -> Self {
        match f {
            MoveFailure::AlreadyInUse => MoveError::TargetInUse,
            MoveFailure::Locked => MoveError::Locked,
            MoveFailure::Other(msg) => MoveError::Failed(msg),
        }
    }
}

/// Errors of `cleanup_space`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CleanupError {
    #[error("no usable free region left")]
    InsufficientSpace,

    #[error("cleanup move failed: {0}")]
    MoveFailed(#[source] MoveError),
}

impl CleanupError {
    pub fn code(&self) -> i32 {
        match self {
            CleanupError::InsufficientSpace => 30,
            CleanupError::MoveFailed(_) => 31,
        }
    }
}

/// Invalid option values found by validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("fragmentation threshold must be within 0..=100, got {0}")]
    FragmentationThreshold(f64),

    #[error("optimizer size limit must be greater than zero")]
    OptimizerSizeLimit,

    #[error("empty pattern in {0} filter")]
    EmptyPattern(&'static str),

    #[error("invalid size value: '{0}'")]
    InvalidSize(String),

    #[error("invalid sorting criterion: '{0}'")]
    InvalidSorting(String),
}

impl ConfigError {
    pub fn code(&self) -> i32 {
        match self {
            ConfigError::FragmentationThreshold(_) => 40,
            ConfigError::OptimizerSizeLimit => 41,
            ConfigError::EmptyPattern(_) => 42,
            ConfigError::InvalidSize(_) => 43,
            ConfigError::InvalidSorting(_) => 44,
        }
    }
}

impl HostError {
    pub fn code(&self) -> i32 {
        match self {
            HostError::NotReady => 50,
            HostError::AccessDenied => 51,
            HostError::Locked => 52,
            HostError::Other(_) => 53,
        }
    }
}

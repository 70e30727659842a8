//! Option types.
//! `JobOptions` carries the engine settings of one job; `Config` adds the
//! binary's console and log-file settings on top.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::OPTIMIZER_SIZE_LIMIT_DEFAULT;
use super::paths;
use crate::errors::ConfigError;
use crate::filter::PatternList;

/// Console verbosity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Errors only.
    Quiet,
    /// One line per phase.
    #[default]
    Normal,
    /// Adds per-file decisions.
    Info,
    /// Everything, including each move burst.
    Debug,
}

impl LogLevel {
    /// Case-insensitive, with a few aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" | "paranoid" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Key used by the optimizer's move-to-front sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortCriterion {
    #[default]
    Path,
    Size,
    CreationTime,
    ModificationTime,
    AccessTime,
}

impl SortCriterion {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "path" => Some(Self::Path),
            "size" => Some(Self::Size),
            "c_time" | "creation_time" | "created" => Some(Self::CreationTime),
            "m_time" | "modification_time" | "modified" => Some(Self::ModificationTime),
            "a_time" | "access_time" | "accessed" => Some(Self::AccessTime),
            _ => None,
        }
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortCriterion::Path => "path",
            SortCriterion::Size => "size",
            SortCriterion::CreationTime => "c_time",
            SortCriterion::ModificationTime => "m_time",
            SortCriterion::AccessTime => "a_time",
        };
        f.write_str(s)
    }
}

impl FromStr for SortCriterion {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ConfigError::InvalidSorting(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Settings for one engine job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    /// Files larger than this many bytes are excluded; `None` means unlimited.
    pub size_limit: Option<u64>,
    /// Files with fewer fragments are excluded; 0 disables the filter.
    pub fragments_limit: u64,
    /// Bytes; 0 disables the filter. Reset to 0 when not above the cluster size.
    pub fragment_size_threshold: u64,
    /// Percent of used clusters that must be fragmented before optimizing.
    pub fragmentation_threshold: f64,
    /// Bytes; blocks below this are always worth moving to the back.
    pub optimizer_size_limit: u64,
    pub in_filter: PatternList,
    pub ex_filter: PatternList,
    pub cut_filter: PatternList,
    pub sort: SortCriterion,
    pub sort_order: SortOrder,
    pub context_menu: bool,
    pub repeat: bool,
    /// Plan and book-keep everything but never call the host's move primitive.
    pub dry_run: bool,
    /// Keep the NTFS MFT zone out of the free-space pool.
    pub reserve_mft_zone: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            size_limit: None,
            fragments_limit: 0,
            fragment_size_threshold: 0,
            fragmentation_threshold: 0.0,
            optimizer_size_limit: OPTIMIZER_SIZE_LIMIT_DEFAULT,
            in_filter: PatternList::default(),
            ex_filter: PatternList::default(),
            cut_filter: PatternList::default(),
            sort: SortCriterion::Path,
            sort_order: SortOrder::Ascending,
            context_menu: false,
            repeat: false,
            dry_run: false,
            reserve_mft_zone: false,
        }
    }
}

/// Runtime configuration used by the binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub options: JobOptions,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            options: JobOptions::default(),
            log_level: LogLevel::Normal,
            log_file: paths::default_log_path(),
        }
    }
}

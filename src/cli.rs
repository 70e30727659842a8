//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - CLI flags override values read from the options file.
//! - --debug is a shorthand for --log-level debug.
//! - Filters are `;`-separated wildcard lists, exactly as in the options file.

use clap::{Parser, ValueEnum, ValueHint};
use std::path::PathBuf;

use defrag_core::config::{Config, LogLevel, SortCriterion, SortOrder};
use defrag_core::errors::ConfigError;
use defrag_core::filter::PatternList;
use defrag_core::utils::parse_size;
use defrag_core::JobKind;

/// Job to run against the volume layout.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobArg {
    Analyze,
    Defrag,
    QuickOptimize,
    FullOptimize,
    OptimizeMft,
    MoveFront,
    MoveEnd,
}

impl From<JobArg> for JobKind {
    fn from(j: JobArg) -> Self {
        match j {
            JobArg::Analyze => JobKind::Analysis,
            JobArg::Defrag => JobKind::Defragmentation,
            JobArg::QuickOptimize => JobKind::QuickOptimization,
            JobArg::FullOptimize => JobKind::FullOptimization,
            JobArg::OptimizeMft => JobKind::MftOptimization,
            JobArg::MoveFront => JobKind::SingleFileMoveFront,
            JobArg::MoveEnd => JobKind::SingleFileMoveEnd,
        }
    }
}

fn parse_sort(s: &str) -> Result<SortCriterion, ConfigError> {
    s.parse()
}

/// Analyze, defragment or optimize a volume described by a layout file.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Plan and run defragmentation and optimization jobs"
)]
pub struct Args {
    /// Job to run.
    #[arg(value_enum, default_value_t = JobArg::Analyze)]
    pub job: JobArg,

    /// Volume layout (XML) served by the in-memory host.
    #[arg(
        long,
        short = 'l',
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        required_unless_present_any = ["print_config", "init_config"]
    )]
    pub layout: Option<PathBuf>,

    /// Options file to use instead of the default location.
    #[arg(long, short = 'c', value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write logs to this file.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Emit logs in structured JSON.
    #[arg(long)]
    pub json: bool,

    /// Plan and account for every move without touching the volume.
    #[arg(long)]
    pub dry_run: bool,

    /// Run the job again while the last run moved something.
    #[arg(long)]
    pub repeat: bool,

    /// Only process paths matching these patterns.
    #[arg(long, value_name = "PATTERNS")]
    pub include: Option<String>,

    /// Skip paths matching these patterns.
    #[arg(long, value_name = "PATTERNS")]
    pub exclude: Option<String>,

    /// Restrict the job to these paths (context-menu mode when set).
    #[arg(long, value_name = "PATTERNS")]
    pub cut: Option<String>,

    /// Skip files larger than this (e.g. 2GB).
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub size_limit: Option<u64>,

    /// Skip files with fewer fragments than this.
    #[arg(long, value_name = "N")]
    pub fragments_limit: Option<u64>,

    /// Skip files whose fragments are all smaller than this.
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub fragment_size_threshold: Option<u64>,

    /// Only defragment or optimize above this fragmentation percentage.
    #[arg(long, value_name = "PERCENT")]
    pub threshold: Option<f64>,

    /// Files below this size are sorted by the optimizer.
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub optimizer_size_limit: Option<u64>,

    /// Sort criterion: path, size, c_time, m_time, a_time.
    #[arg(long, value_name = "KEY", value_parser = parse_sort)]
    pub sort: Option<SortCriterion>,

    /// Sort in descending order.
    #[arg(long)]
    pub descending: bool,

    /// Keep the NTFS MFT zone out of the free-space pool.
    #[arg(long)]
    pub reserve_mft_zone: bool,

    /// Print where the options file is looked up, then exit.
    #[arg(long)]
    pub print_config: bool,

    /// Write a template options file (to --config or the default path), then exit.
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(path) = &self.log_file {
            cfg.log_file = Some(path.clone());
        }

        let o = &mut cfg.options;
        if self.dry_run {
            o.dry_run = true;
        }
        if self.repeat {
            o.repeat = true;
        }
        if let Some(s) = &self.include {
            o.in_filter = PatternList::parse(s);
        }
        if let Some(s) = &self.exclude {
            o.ex_filter = PatternList::parse(s);
        }
        if let Some(s) = &self.cut {
            o.cut_filter = PatternList::parse(s);
            o.context_menu = true;
        }
        if let Some(n) = self.size_limit {
            o.size_limit = Some(n);
        }
        if let Some(n) = self.fragments_limit {
            o.fragments_limit = n;
        }
        if let Some(n) = self.fragment_size_threshold {
            o.fragment_size_threshold = n;
        }
        if let Some(t) = self.threshold {
            o.fragmentation_threshold = t;
        }
        if let Some(n) = self.optimizer_size_limit {
            o.optimizer_size_limit = n;
        }
        if let Some(s) = self.sort {
            o.sort = s;
        }
        if self.descending {
            o.sort_order = SortOrder::Descending;
        }
        if self.reserve_mft_zone {
            o.reserve_mft_zone = true;
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_file_values() {
        let args = Args::try_parse_from([
            "defrag_core",
            "quick-optimize",
            "--layout",
            "v.xml",
            "--exclude",
            "*.tmp;*.bak",
            "--size-limit",
            "1MB",
            "--sort",
            "m_time",
            "--descending",
            "-d",
        ])
        .unwrap();
        assert_eq!(JobKind::from(args.job), JobKind::QuickOptimization);

        let mut cfg = Config::default();
        args.apply_overrides(&mut cfg);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.options.ex_filter.len(), 2);
        assert_eq!(cfg.options.size_limit, Some(1 << 20));
        assert_eq!(cfg.options.sort, SortCriterion::ModificationTime);
        assert_eq!(cfg.options.sort_order, SortOrder::Descending);
        assert!(!cfg.options.context_menu);
    }

    #[test]
    fn layout_is_required_for_jobs() {
        assert!(Args::try_parse_from(["defrag_core", "defrag"]).is_err());
        assert!(Args::try_parse_from(["defrag_core", "--print-config"]).is_ok());
    }
}

use owo_colors::OwoColorize;

use crate::job::{JobOutcome, JobStatus};
use crate::utils::format_bytes;

/// Small wrapper around stdout/stderr printing to provide consistent, colored
/// user-facing messages. Colors are enabled only when output is a TTY.
fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub fn print_info(msg: &str) {
    if is_tty() {
        println!("{} {}", "info:".cyan().bold(), msg);
    } else {
        println!("info: {}", msg);
    }
}

pub fn print_warn(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    } else {
        eprintln!("warn: {}", msg);
    }
}

pub fn print_error(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {}", msg);
    }
}

pub fn print_success(msg: &str) {
    if is_tty() {
        println!("{} {}", "ok:".green().bold(), msg);
    } else {
        println!("ok: {}", msg);
    }
}

/// Print a plain user-facing line (no prefix). Use this for primary outputs
/// such as the report lines which users may script against.
pub fn print_user(msg: &str) {
    println!("{}", msg);
}

/// Lines of the end-of-job report.
pub fn report_lines(outcome: &JobOutcome) -> Vec<String> {
    let c = &outcome.counters;
    let bpc = outcome.geometry.bytes_per_cluster;
    let mut lines = vec![
        format!("job: {}", outcome.kind),
        format!("volume size: {}", format_bytes(c.total_space)),
        format!("free space: {}", format_bytes(c.free_space)),
        format!(
            "files: {} ({} directories, {} compressed)",
            c.files, c.directories, c.compressed
        ),
        format!(
            "fragmented files: {} ({} fragments)",
            c.fragmented, c.fragments
        ),
        format!("fragmentation: {:.2}%", outcome.fragmentation),
    ];
    if outcome.kind != crate::job::JobKind::Analysis {
        lines.push(format!(
            "moves: {} ({} failed), {} moved",
            c.total_moves,
            c.failed_moves,
            format_bytes(c.moved_clusters.saturating_mul(bpc))
        ));
        lines.push(format!("passes: {}, runs: {}", c.pass_number, outcome.runs));
    }
    if c.locked_files > 0 {
        lines.push(format!("locked files: {}", c.locked_files));
    }
    lines
}

/// Print the end-of-job report followed by a status line.
pub fn print_outcome(outcome: &JobOutcome) {
    for line in report_lines(outcome) {
        print_user(&line);
    }
    if let Some(e) = &outcome.error {
        print_error(&format!("{} failed (code {}): {e}", outcome.kind, e.code()));
        return;
    }
    let status = if outcome.cancelled {
        format!("{} cancelled", outcome.kind)
    } else {
        format!("{} {}", outcome.kind, outcome.status)
    };
    match outcome.status {
        JobStatus::Succeeded if !outcome.cancelled => print_success(&status),
        _ => print_warn(&status),
    }
}

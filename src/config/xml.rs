//! XML options support.
//! - Loads job options and logging settings from options.xml (quick_xml).
//! - Writes a commented template on request.
//!
//! Notes:
//! - Unknown XML fields are rejected so misspelled options surface early.
//! - Sizes accept plain byte counts or KB/MB/GB/TB suffixes.
//! - A missing file is not an error: defaults apply.

use anyhow::{Context, Result, bail};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::paths::default_config_path;
use super::types::{Config, LogLevel, SortCriterion, SortOrder};
use crate::filter::PatternList;
use crate::utils::parse_size;

/// Struct mirroring the XML options for deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "options")]
#[serde(deny_unknown_fields)]
struct XmlOptions {
    size_limit: Option<String>,
    fragments_limit: Option<u64>,
    fragment_size_threshold: Option<String>,
    fragmentation_threshold: Option<f64>,
    optimizer_size_limit: Option<String>,
    in_filter: Option<String>,
    ex_filter: Option<String>,
    cut_filter: Option<String>,
    sorting: Option<String>,
    sorting_order: Option<String>,
    context_menu: Option<bool>,
    repeat: Option<bool>,
    dry_run: Option<bool>,
    reserve_mft_zone: Option<bool>,
    log_level: Option<String>,
    log_file: Option<String>,
}

fn trimmed(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// Map XmlOptions -> Config on top of defaults.
fn xml_to_config(parsed: XmlOptions) -> Result<Config> {
    let mut cfg = Config::default();
    let o = &mut cfg.options;

    if let Some(s) = trimmed(&parsed.size_limit) {
        o.size_limit = Some(parse_size(s)?);
    }
    if let Some(n) = parsed.fragments_limit {
        o.fragments_limit = n;
    }
    if let Some(s) = trimmed(&parsed.fragment_size_threshold) {
        o.fragment_size_threshold = parse_size(s)?;
    }
    if let Some(t) = parsed.fragmentation_threshold {
        o.fragmentation_threshold = t;
    }
    if let Some(s) = trimmed(&parsed.optimizer_size_limit) {
        o.optimizer_size_limit = parse_size(s)?;
    }
    if let Some(s) = trimmed(&parsed.in_filter) {
        o.in_filter = PatternList::parse(s);
    }
    if let Some(s) = trimmed(&parsed.ex_filter) {
        o.ex_filter = PatternList::parse(s);
    }
    if let Some(s) = trimmed(&parsed.cut_filter) {
        o.cut_filter = PatternList::parse(s);
    }
    if let Some(s) = trimmed(&parsed.sorting) {
        o.sort = s.parse::<SortCriterion>()?;
    }
    if let Some(s) = trimmed(&parsed.sorting_order) {
        o.sort_order = match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => SortOrder::Ascending,
            "desc" | "descending" => SortOrder::Descending,
            other => bail!("invalid sorting order: '{other}'"),
        };
    }
    o.context_menu = parsed.context_menu.unwrap_or(false);
    o.repeat = parsed.repeat.unwrap_or(false);
    o.dry_run = parsed.dry_run.unwrap_or(false);
    o.reserve_mft_zone = parsed.reserve_mft_zone.unwrap_or(false);

    if let Some(s) = trimmed(&parsed.log_level) {
        cfg.log_level = s
            .parse::<LogLevel>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(s) = trimmed(&parsed.log_file) {
        cfg.log_file = Some(PathBuf::from(s));
    }
    Ok(cfg)
}

/// Parse options XML from a string.
pub fn load_config_from_str(contents: &str) -> Result<Config> {
    let parsed: XmlOptions = from_xml_str(contents).context("parse options xml")?;
    xml_to_config(parsed)
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read options xml '{}'", path.display()))?;
    let cfg = load_config_from_str(&contents)
        .with_context(|| format!("load options xml '{}'", path.display()))?;
    debug!(path = %path.display(), "options loaded");
    Ok(cfg)
}

/// Load options from `$DEFRAG_CORE_CONFIG` or the default path; defaults when missing.
pub fn load_config() -> Result<Config> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_from_xml_path(&path),
        Some(path) => {
            debug!(path = %path.display(), "no options file, using defaults");
            Ok(Config::default())
        }
        None => Ok(Config::default()),
    }
}

/// Write a commented template options file (parent directories are created).
pub fn create_template_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file '{}'", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory '{}'", parent.display()))?;
    }
    let content = "<!--\n  defrag_core options (XML)\n\n  Filters:\n    in_filter / ex_filter / cut_filter -> ';'-separated wildcard lists (* and ?)\n\n  Sizes accept plain bytes or KB/MB/GB/TB suffixes.\n  sorting -> path | size | c_time | m_time | a_time\n  sorting_order -> asc | desc\n  log_level -> quiet | normal | info | debug\n\n  CLI flags override XML values.\n-->\n<options>\n  <fragments_limit>0</fragments_limit>\n  <fragmentation_threshold>0</fragmentation_threshold>\n  <optimizer_size_limit>20MB</optimizer_size_limit>\n  <ex_filter>*temp*;*tmp*;*.dmp</ex_filter>\n  <sorting>path</sorting>\n  <sorting_order>asc</sorting_order>\n  <repeat>false</repeat>\n  <dry_run>false</dry_run>\n  <log_level>normal</log_level>\n</options>\n";
    fs::write(path, content).with_context(|| format!("write template '{}'", path.display()))?;
    info!(path = %path.display(), "created template options file");
    Ok(())
}

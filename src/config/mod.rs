//! Config module.
//! Provides option types, default paths, XML loading, and validation.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{default_config_path, default_log_path};
pub use types::{Config, JobOptions, LogLevel, SortCriterion, SortOrder};
pub use xml::{create_template_config, load_config, load_config_from_str, load_config_from_xml_path};

/// Environment variable naming an options file to use instead of the default.
pub const CONFIG_ENV: &str = "DEFRAG_CORE_CONFIG";

pub const OPTIMIZER_SIZE_LIMIT_DEFAULT: u64 = 20 * 1024 * 1024;

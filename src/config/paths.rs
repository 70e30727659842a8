//! Default path helpers.
//! Determines OS-appropriate options/log paths and honours the env override.

use dirs::{config_dir, data_dir};
use std::env;
use std::fs;
use std::path::PathBuf;

use super::CONFIG_ENV;

/// Options file path: `$DEFRAG_CORE_CONFIG` when set, else the OS config dir.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(p) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }
    if let Some(mut base) = config_dir() {
        base.push("defrag_core");
        base.push("options.xml");
        Some(base)
    } else {
        env::var("HOME").ok().map(|h| {
            PathBuf::from(h)
                .join(".config")
                .join("defrag_core")
                .join("options.xml")
        })
    }
}

/// OS-appropriate default log file path (data dir).
pub fn default_log_path() -> Option<PathBuf> {
    if let Some(mut base) = data_dir() {
        base.push("defrag_core");
        // ensure dir exists (best-effort)
        let _ = fs::create_dir_all(&base);
        base.push("defrag_core.log");
        Some(base)
    } else {
        env::var("HOME").ok().map(|h| {
            PathBuf::from(h)
                .join(".local")
                .join("share")
                .join("defrag_core")
                .join("defrag_core.log")
        })
    }
}

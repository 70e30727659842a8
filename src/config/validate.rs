//! Option validation.
//! Rejects values the engine cannot work with before a job starts.

use tracing::{debug, error};

use super::types::JobOptions;
use crate::errors::ConfigError;

impl JobOptions {
    /// Check ranges and filter lists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.fragmentation_threshold) {
            error!(
                value = self.fragmentation_threshold,
                "fragmentation threshold out of range"
            );
            return Err(ConfigError::FragmentationThreshold(
                self.fragmentation_threshold,
            ));
        }
        if self.optimizer_size_limit == 0 {
            error!("optimizer size limit is zero");
            return Err(ConfigError::OptimizerSizeLimit);
        }
        for (name, list) in [
            ("include", &self.in_filter),
            ("exclude", &self.ex_filter),
            ("cut", &self.cut_filter),
        ] {
            if list.has_empty_pattern() {
                error!(filter = name, "empty pattern in filter");
                return Err(ConfigError::EmptyPattern(name));
            }
        }
        debug!(
            size_limit = ?self.size_limit,
            fragments_limit = self.fragments_limit,
            fragment_size_threshold = self.fragment_size_threshold,
            sort = %self.sort,
            "job options validated"
        );
        Ok(())
    }
}

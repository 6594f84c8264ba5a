//! Configuration for the mirror.
//!
//! Policy knobs only; none of these are correctness-critical. Values are
//! layered: built-in defaults, then an optional TOML file, then environment
//! variables prefixed with `DIRMIRROR_` (nested keys separated by `__`,
//! e.g. `DIRMIRROR_PAGING__PAGE_SIZE=50`).

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "DIRMIRROR";

/// Search paging defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Page size requested via the paged-results control.
    pub page_size: u32,
    /// Scroll mode exposes next/top page searches instead of
    /// auto-continuing.
    pub scroll_mode: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            scroll_mode: false,
        }
    }
}

/// Subtree operation policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Children are re-enumerated in batches of this size during recursive
    /// delete.
    pub delete_batch_size: u32,
    /// Upper bound on "Copy N of X" rename attempts during copy conflict
    /// resolution.
    pub alternate_name_limit: u32,
    /// Whether batch operations continue with remaining siblings after a
    /// branch failure.
    pub continue_on_error: bool,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: 100,
            alternate_name_limit: 20,
            continue_on_error: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub paging: PagingConfig,
    pub operations: OperationConfig,
}

impl MirrorConfig {
    /// Load configuration: defaults, then `file` (if given and present),
    /// then `DIRMIRROR_*` environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&MirrorConfig::default())
            .map_err(|e| MirrorError::config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| MirrorError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.paging.page_size, 100);
        assert!(!config.paging.scroll_mode);
        assert_eq!(config.operations.delete_batch_size, 100);
        assert_eq!(config.operations.alternate_name_limit, 20);
        assert!(config.operations.continue_on_error);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[paging]\npage_size = 25\nscroll_mode = true").unwrap();

        let config = MirrorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.paging.page_size, 25);
        assert!(config.paging.scroll_mode);
        // untouched sections keep their defaults
        assert_eq!(config.operations.delete_batch_size, 100);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = MirrorConfig::load(Some(Path::new("/nonexistent/dirmirror.toml"))).unwrap();
        assert_eq!(config.paging.page_size, 100);
    }

    #[test]
    fn test_environment_overrides_win() {
        // set_var is unsafe since edition 2024; this is the only test in
        // the binary touching this variable
        unsafe { std::env::set_var("DIRMIRROR_OPERATIONS__DELETE_BATCH_SIZE", "7") };
        let config = MirrorConfig::load(None).unwrap();
        unsafe { std::env::remove_var("DIRMIRROR_OPERATIONS__DELETE_BATCH_SIZE") };

        assert_eq!(config.operations.delete_batch_size, 7);
        assert_eq!(config.paging.page_size, 100);
    }
}

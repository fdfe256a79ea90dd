//! CLI command implementations.

pub mod bench;
pub mod dump;

pub use bench::{run_bench, BenchOptions, Engine};
pub use dump::dump_snapshot;

use anyhow::{Context, Result};
use std::path::Path;
use tspace::DirectoryConfig;

/// Read `path` if it exists, otherwise fall back to defaults
pub fn load_config(path: &Path) -> Result<DirectoryConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(DirectoryConfig::default());
    }
    DirectoryConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

//! Inspect a persistent space snapshot.

use anyhow::{bail, Context, Result};
use std::io::{self, Write};
use std::path::Path;
use tspace::{DirectoryConfig, PersistentSpace, Space, SpaceConfig};

pub fn dump_snapshot(config: &DirectoryConfig, snapshot: &Path) -> Result<()> {
    if !snapshot.is_file() {
        bail!("snapshot not found: {}", snapshot.display());
    }

    // Inspection only; no sweeper, and the space is never closed so the
    // file is left untouched.
    let space_config = SpaceConfig {
        sweeper: false,
        ..config.defaults.clone()
    };
    let space: PersistentSpace<String, serde_json::Value> =
        PersistentSpace::open("snapshot", snapshot, space_config)
            .with_context(|| format!("failed to open {}", snapshot.display()))?;

    let report = space.load_report();
    tracing::info!(
        restored = report.restored,
        skipped = report.skipped,
        "snapshot loaded"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    space.dump(&mut out, "")?;
    writeln!(
        out,
        "restored {} values, skipped {} expired",
        report.restored, report.skipped
    )?;
    Ok(())
}

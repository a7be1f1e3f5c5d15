//! `graft snapshot`: Archive a root filesystem.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;

use super::Context;
use crate::output::{self, format_bytes};

/// Arguments for the `snapshot` command.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Root to archive.
    #[arg(default_value = "/")]
    pub root: PathBuf,

    /// Archive file to write.
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Executes the `snapshot` command.
///
/// # Errors
///
/// Returns an error if the snapshot fails; no archive is left behind.
pub fn execute(ctx: &Context, args: SnapshotArgs) -> anyhow::Result<()> {
    let started = Instant::now();
    let engine = ctx.engine()?;
    let stats = engine.snapshot(&args.root, &args.output, &ctx.exclude)?;

    output::done(&format!(
        "Snapshot of {} written to {} in {:.1}s",
        args.root.display(),
        args.output.display(),
        started.elapsed().as_secs_f64()
    ));
    output::detail(&format!(
        "{} dirs, {} files, {} symlinks, {} hardlinks, {}",
        stats.directories,
        stats.files,
        stats.symlinks,
        stats.hardlinks,
        format_bytes(stats.bytes)
    ));
    if stats.skipped > 0 {
        output::notice(&format!("{} entries vanished during the snapshot", stats.skipped));
    }
    Ok(())
}

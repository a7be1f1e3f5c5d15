//! `graft restore`: Purge a root and restore an archive over it.

use std::path::PathBuf;

use clap::Args;

use super::Context;
use crate::output;

/// Arguments for the `restore` command.
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Archive to restore (tar or tar.gz).
    pub archive: PathBuf,

    /// Root to restore into.
    #[arg(default_value = "/")]
    pub dest: PathBuf,
}

/// Executes the `restore` command.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or the restore fails.
pub fn execute(ctx: &Context, args: RestoreArgs) -> anyhow::Result<()> {
    let engine = ctx.engine()?;
    let report = engine.restore(&args.archive, &args.dest, &ctx.exclude)?;
    let stats = report.restored;

    output::done(&format!(
        "Restored {} into {}",
        args.archive.display(),
        args.dest.display()
    ));
    output::detail(&format!(
        "{} removed, {} dirs, {} files, {} links, {} excluded",
        report.purged,
        stats.directories,
        stats.files,
        stats.symlinks + stats.hardlinks,
        stats.excluded
    ));
    if stats.skipped > 0 {
        output::notice(&format!("{} records skipped; see warnings above", stats.skipped));
    }
    Ok(())
}

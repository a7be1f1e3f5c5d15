//! `graft list`: Show the units an operation on a root would cover.

use std::path::PathBuf;

use clap::Args;

use super::Context;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Root to enumerate.
    #[arg(default_value = "/")]
    pub root: PathBuf,
}

/// Executes the `list` command, one path per line on stdout.
///
/// # Errors
///
/// Returns an error if enumeration fails.
pub fn execute(ctx: &Context, args: ListArgs) -> anyhow::Result<()> {
    let paths = ctx.engine()?.list(&args.root, &ctx.exclude)?;
    for path in &paths {
        println!("{}", path.display());
    }
    tracing::info!(root = %args.root.display(), units = paths.len(), "listed");
    Ok(())
}

//! `graft sandbox`: Run a command in an image rootfs under the sandbox
//! binary.

use std::path::PathBuf;

use clap::Args;
use rootgraft_runtime::exec::exec_sandbox;
use rootgraft_runtime::sandbox::locate_binary;

use super::{Context, ImageArgs};

/// Arguments for the `sandbox` command.
#[derive(Args, Debug)]
pub struct SandboxArgs {
    /// Image whose config drives the sandbox.
    #[command(flatten)]
    pub image: ImageArgs,

    /// Directory holding the unpacked image rootfs.
    #[arg(long)]
    pub root: PathBuf,

    /// Print the sandbox command line instead of running it.
    #[arg(long)]
    pub dry_run: bool,

    /// Command to run instead of the image command.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Executes the `sandbox` command. Returns only on failure or `--dry-run`.
///
/// # Errors
///
/// Returns an error if the plan cannot be built or the sandbox binary
/// cannot be started.
pub fn execute(ctx: &Context, args: SandboxArgs) -> anyhow::Result<()> {
    let image = args.image.load()?;
    let plan = ctx.engine()?.sandbox(
        &image,
        &args.root,
        &ctx.exclude,
        &args.command,
        ctx.env_options,
    )?;
    let binary_name = ctx.config.sandbox_binary();

    if args.dry_run {
        println!("{binary_name} {}", plan.to_args().join(" "));
        return Ok(());
    }

    let binary = locate_binary(binary_name)?;
    match exec_sandbox(&binary, &plan)? {}
}

//! `graft exec`: Replace this process with a command under the image
//! environment.

use clap::Args;
use rootgraft_runtime::exec::exec_with_env;
use rootgraft_runtime::sandbox::resolve_command;

use super::{Context, ImageArgs};

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Image whose environment and command are used.
    #[command(flatten)]
    pub image: ImageArgs,

    /// Command to run instead of the image command.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command. Returns only on failure.
///
/// # Errors
///
/// Returns an error if the image cannot be loaded or the command cannot be
/// started.
pub fn execute(ctx: &Context, args: ExecArgs) -> anyhow::Result<()> {
    let image = args.image.load()?;
    let env = ctx.engine()?.exec_env(&image, ctx.env_options)?;
    let command = resolve_command(&image, &args.command);
    match exec_with_env(&command, &env)? {}
}

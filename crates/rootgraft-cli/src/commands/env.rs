//! `graft env`: Print the environment script for an image.

use clap::Args;

use super::{Context, ImageArgs};

/// Arguments for the `env` command.
#[derive(Args, Debug)]
pub struct EnvArgs {
    /// Image whose environment is exported.
    #[command(flatten)]
    pub image: ImageArgs,
}

/// Executes the `env` command.
///
/// # Errors
///
/// Returns an error if the image cannot be loaded or the baseline cannot be
/// read or written.
pub fn execute(ctx: &Context, args: EnvArgs) -> anyhow::Result<()> {
    let image = args.image.load()?;
    let delta = ctx.engine()?.env(&image, ctx.env_options)?;
    tracing::debug!(unset = delta.unset.len(), export = delta.export.len(), "env delta");
    print!("{}", delta.render());
    Ok(())
}

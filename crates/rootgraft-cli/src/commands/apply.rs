//! `graft apply`: Transplant an image onto a root.
//!
//! The environment script goes to stdout, so the usual invocation is
//! `eval "$(graft apply --image config.json --rootfs rootfs.tar /)"`.

use std::path::PathBuf;

use clap::Args;

use super::{Context, ImageArgs};
use crate::output;

/// Arguments for the `apply` command.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Image to apply.
    #[command(flatten)]
    pub image: ImageArgs,

    /// Root to transplant the image onto.
    #[arg(default_value = "/")]
    pub dest: PathBuf,
}

/// Executes the `apply` command.
///
/// # Errors
///
/// Returns an error if the image cannot be loaded or the transplant fails.
pub fn execute(ctx: &Context, args: ApplyArgs) -> anyhow::Result<()> {
    let image = args.image.load()?;
    let engine = ctx.engine()?;
    let report = engine.apply(&image, &args.dest, &ctx.exclude, ctx.env_options)?;

    output::done(&format!(
        "Applied {} onto {}",
        args.image.rootfs.display(),
        args.dest.display()
    ));
    output::detail(&format!(
        "{} removed, {} files restored",
        report.filesystem.purged, report.filesystem.restored.files
    ));
    print!("{}", report.env.render());
    Ok(())
}

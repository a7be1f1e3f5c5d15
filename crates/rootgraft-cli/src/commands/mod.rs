//! CLI command definitions and dispatch.

pub mod apply;
pub mod env;
pub mod exec;
pub mod list;
pub mod restore;
pub mod sandbox;
pub mod snapshot;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use rootgraft_common::config::GraftConfig;
use rootgraft_common::constants;
use rootgraft_common::types::CancelToken;
use rootgraft_image::image::LocalImage;
use rootgraft_runtime::engine::{Engine, EnvOptions};

/// rootgraft: transplant container images onto a live root and back.
#[derive(Parser, Debug)]
#[command(name = constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file [default: <data dir>/config.json].
    #[arg(long, global = true, env = "GRAFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Paths to exclude, separated by `:` or `,`; prefix with `!` to force-include.
    #[arg(long, short = 'x', global = true)]
    pub exclude: Vec<String>,

    /// Let image variables override session-local ones.
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub overwrite: Option<bool>,

    /// Store the image environment as the baseline for the next run.
    #[arg(long, global = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub persist: Option<bool>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Archive a root filesystem, skipping mounts and exclusions.
    Snapshot(snapshot::SnapshotArgs),
    /// Purge a root and restore an archive over it.
    Restore(restore::RestoreArgs),
    /// Transplant an image onto a root and print its environment script.
    Apply(apply::ApplyArgs),
    /// Print the environment script for an image.
    Env(env::EnvArgs),
    /// Replace this process with a command under the image environment.
    Exec(exec::ExecArgs),
    /// Run a command inside a sandboxed image rootfs.
    Sandbox(sandbox::SandboxArgs),
    /// List the paths an operation on a root would cover.
    List(list::ListArgs),
}

/// Image given as a config file and a rootfs archive.
#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Image config JSON (OCI config or its `config` object).
    #[arg(long = "image")]
    pub image_config: PathBuf,

    /// Image rootfs archive (tar or tar.gz).
    #[arg(long)]
    pub rootfs: PathBuf,
}

impl ImageArgs {
    /// Loads the image.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing or the config is invalid.
    pub fn load(&self) -> anyhow::Result<LocalImage> {
        LocalImage::load(&self.image_config, &self.rootfs).with_context(|| {
            format!("cannot load image from {}", self.image_config.display())
        })
    }
}

/// State shared by every command: resolved config, flags, and cancellation.
#[derive(Debug)]
pub struct Context {
    /// Loaded configuration.
    pub config: GraftConfig,
    /// Exclusion patterns from the command line.
    pub exclude: Vec<String>,
    /// Environment options after applying flags over the config.
    pub env_options: EnvOptions,
    /// Cancelled by Ctrl+C.
    pub cancel: CancelToken,
}

impl Context {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let path = cli.config.clone().unwrap_or_else(|| {
            constants::default_data_dir().join(constants::CONFIG_FILE_NAME)
        });
        let config = GraftConfig::load(&path)
            .with_context(|| format!("cannot load configuration {}", path.display()))?;

        let env_options = EnvOptions {
            overwrite: config.overwrite(cli.overwrite),
            persist: config.persist_env(cli.persist),
        };

        let cancel = CancelToken::new();
        let handler_token = cancel.clone();
        ctrlc::set_handler(move || handler_token.cancel())
            .context("failed to set Ctrl+C handler")?;

        Ok(Self {
            config,
            exclude: cli.exclude.clone(),
            env_options,
            cancel,
        })
    }

    /// Builds an engine for this invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable directory cannot be determined.
    pub fn engine(&self) -> anyhow::Result<Engine> {
        let exec_dir = self.config.exec_dir(constants::current_exec_dir())?;
        Ok(Engine::new(self.config.clone(), exec_dir, self.cancel.clone()))
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::from_cli(&cli)?;
    match cli.command {
        Command::Snapshot(args) => snapshot::execute(&ctx, args),
        Command::Restore(args) => restore::execute(&ctx, args),
        Command::Apply(args) => apply::execute(&ctx, args),
        Command::Env(args) => env::execute(&ctx, args),
        Command::Exec(args) => exec::execute(&ctx, args),
        Command::Sandbox(args) => sandbox::execute(&ctx, args),
        Command::List(args) => list::execute(&ctx, args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "graft", "list", "/srv", "-x", "/srv/cache:/srv/tmp", "--exclude", "!/srv/tmp/keep",
            "--overwrite",
        ])
        .expect("parse");
        assert_eq!(cli.exclude.len(), 2);
        assert_eq!(cli.overwrite, Some(true));
        assert_eq!(cli.persist, None);
    }

    #[test]
    fn cli_explicit_false_is_distinct_from_unset() {
        let cli = Cli::try_parse_from(["graft", "--persist=false", "list", "/"]).expect("parse");
        assert_eq!(cli.persist, Some(false));
    }

    #[test]
    fn cli_exec_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "graft", "exec", "--image", "c.json", "--rootfs", "r.tar", "--", "ls", "-la",
        ])
        .expect("parse");
        match cli.command {
            Command::Exec(args) => {
                assert_eq!(args.command, vec!["ls".to_owned(), "-la".to_owned()]);
            }
            other => unreachable!("parsed as {other:?}"),
        }
    }
}

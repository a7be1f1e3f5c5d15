//! Process replacement with a reconciled environment.

use std::convert::Infallible;
use std::path::Path;
use std::process::Command;

use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::EnvMap;

use crate::sandbox::SandboxPlan;

/// Replaces the current process with `command`, running under exactly
/// `env`. Only returns on failure.
///
/// # Errors
///
/// Returns `Config` if the command is empty, or the `execve(2)` failure.
#[cfg(unix)]
pub fn exec_with_env(command: &[String], env: &EnvMap) -> Result<Infallible> {
    let Some((program, args)) = command.split_first() else {
        return Err(GraftError::Config {
            message: "exec command is empty".into(),
        });
    };
    tracing::info!(program = %program, args = args.len(), vars = env.len(), "replacing process");

    let mut cmd = Command::new(program);
    let _ = cmd.args(args).env_clear().envs(env);
    Err(replace(cmd, Path::new(program)))
}

/// Replaces the current process with the sandbox binary running `plan`.
///
/// # Errors
///
/// Returns the `execve(2)` failure.
#[cfg(unix)]
pub fn exec_sandbox(binary: &Path, plan: &SandboxPlan) -> Result<Infallible> {
    tracing::info!(
        binary = %binary.display(),
        rootfs = %plan.rootfs.display(),
        identity = %plan.identity,
        "entering sandbox"
    );
    Err(replace(plan.command(binary), binary))
}

#[cfg(unix)]
fn replace(mut cmd: Command, program: &Path) -> GraftError {
    use std::os::unix::process::CommandExt;

    let err = cmd.exec();
    GraftError::io(program, err)
}

/// Process replacement requires a Unix `execve`.
///
/// # Errors
///
/// Always returns an error on non-Unix platforms.
#[cfg(not(unix))]
pub fn exec_with_env(_command: &[String], _env: &EnvMap) -> Result<Infallible> {
    Err(GraftError::Config {
        message: "exec requires a Unix platform".into(),
    })
}

/// Process replacement requires a Unix `execve`.
///
/// # Errors
///
/// Always returns an error on non-Unix platforms.
#[cfg(not(unix))]
pub fn exec_sandbox(_binary: &Path, _plan: &SandboxPlan) -> Result<Infallible> {
    Err(GraftError::Config {
        message: "sandbox requires a Unix platform".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_with_env_empty_command_is_config_error() {
        let err = exec_with_env(&[], &EnvMap::new()).expect_err("empty");
        assert!(matches!(err, GraftError::Config { .. }));
    }

    #[test]
    fn exec_with_env_missing_program_returns_error() {
        let command = vec!["/nonexistent/graft-test-program".to_owned()];
        let err = exec_with_env(&command, &EnvMap::new()).expect_err("missing");
        assert!(err.is_missing_source());
    }
}

//! Sandbox launch plan.
//!
//! The sandbox binary (proot by default) is not reimplemented; this module
//! only computes its inputs: the rootfs, bind mounts that keep live host
//! paths visible, working directory, identity, environment, and command.

use std::path::{Path, PathBuf};
use std::process::Command;

use rootgraft_common::constants::DEFAULT_SHELL;
use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::{EnvMap, Identity};
use rootgraft_core::exclusion::ExclusionSet;
use rootgraft_image::image::Image;

/// A host path made visible inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Host path.
    pub source: PathBuf,
    /// Path inside the sandbox.
    pub destination: PathBuf,
}

impl BindMount {
    /// Binds a host path to the same path inside the sandbox.
    #[must_use]
    pub fn identity(path: &Path) -> Self {
        Self {
            source: path.to_path_buf(),
            destination: path.to_path_buf(),
        }
    }
}

/// Everything the sandbox binary needs to start a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPlan {
    /// Root filesystem directory.
    pub rootfs: PathBuf,
    /// Bind mounts in the order they are passed.
    pub binds: Vec<BindMount>,
    /// Working directory inside the sandbox.
    pub working_dir: PathBuf,
    /// User and group the command runs as.
    pub identity: Identity,
    /// Full environment of the command.
    pub env: EnvMap,
    /// Command vector, never empty.
    pub command: Vec<String>,
}

impl SandboxPlan {
    /// Renders the plan as sandbox binary arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.binds.len() + self.command.len() + 3);
        args.push(format!("--rootfs={}", self.rootfs.display()));
        for bind in &self.binds {
            args.push(format!(
                "--bind={}:{}",
                bind.source.display(),
                bind.destination.display()
            ));
        }
        args.push(format!("--cwd={}", self.working_dir.display()));
        args.push(format!("--change-id={}", self.identity));
        args.extend(self.command.iter().cloned());
        args
    }

    /// Builds the process command for `binary`, with a cleared environment
    /// replaced by the plan's.
    #[must_use]
    pub fn command(&self, binary: &Path) -> Command {
        let mut command = Command::new(binary);
        let _ = command.args(self.to_args()).env_clear().envs(&self.env);
        command
    }
}

/// Locates the sandbox binary on `PATH`, or verifies an explicit path.
///
/// # Errors
///
/// Returns `NotFound` if the binary cannot be located.
pub fn locate_binary(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|e| {
        tracing::debug!(binary = name, error = %e, "sandbox binary lookup failed");
        GraftError::NotFound {
            kind: "sandbox binary",
            id: name.to_owned(),
        }
    })
}

/// Collects bind mounts: every excluded path and image volume that exists
/// on the host, deduplicated, in path order.
#[must_use]
pub fn bind_mounts(exclusions: &ExclusionSet, volumes: &[PathBuf]) -> Vec<BindMount> {
    let mut paths: Vec<&Path> = exclusions
        .excluded_paths()
        .chain(volumes.iter().map(PathBuf::as_path))
        .filter(|path| {
            let exists = path.exists();
            if !exists {
                tracing::debug!(path = %path.display(), "not binding missing host path");
            }
            exists
        })
        .collect();
    paths.sort();
    paths.dedup();
    paths.into_iter().map(BindMount::identity).collect()
}

/// Resolves the command vector: `Entrypoint ++ (args or Cmd)`, falling back
/// to the image shell and then to `/bin/sh`.
#[must_use]
pub fn resolve_command(image: &dyn Image, args: &[String]) -> Vec<String> {
    let tail = if args.is_empty() { image.cmd() } else { args };
    let command: Vec<String> = image.entrypoint().iter().chain(tail).cloned().collect();
    if !command.is_empty() {
        return command;
    }
    if !image.shell().is_empty() {
        return image.shell().to_vec();
    }
    vec![DEFAULT_SHELL.to_owned()]
}

/// Resolves an image `User` value against the rootfs account files.
///
/// Accepts `user`, `uid`, `user:group`, or `uid:gid` in any mix. A numeric
/// user without a group takes its primary group from `/etc/passwd` when
/// listed there, else 0. Empty means `0:0`.
///
/// # Errors
///
/// Returns `Config` if a name is not listed in the rootfs, or an I/O
/// error if the account files exist but cannot be read.
pub fn resolve_identity(user: &str, rootfs: &Path) -> Result<Identity> {
    if user.is_empty() {
        return Ok(Identity::default());
    }
    let (user_part, group_part) = match user.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (user, None),
    };

    let passwd = read_account_file(&rootfs.join("etc/passwd"))?;
    let account = passwd.iter().find(|fields| match user_part.parse::<u32>() {
        Ok(uid) => fields.get(2).and_then(|f| f.parse::<u32>().ok()) == Some(uid),
        Err(_) => fields.first().map(String::as_str) == Some(user_part),
    });

    let uid = match user_part.parse::<u32>() {
        Ok(uid) => uid,
        Err(_) => account
            .and_then(|fields| fields.get(2)?.parse().ok())
            .ok_or_else(|| unknown("user", user_part, rootfs))?,
    };

    let gid = match group_part {
        Some(group) => match group.parse::<u32>() {
            Ok(gid) => gid,
            Err(_) => {
                let groups = read_account_file(&rootfs.join("etc/group"))?;
                groups
                    .iter()
                    .find(|fields| fields.first().map(String::as_str) == Some(group))
                    .and_then(|fields| fields.get(2)?.parse().ok())
                    .ok_or_else(|| unknown("group", group, rootfs))?
            }
        },
        None => account
            .and_then(|fields| fields.get(3)?.parse().ok())
            .unwrap_or(0),
    };

    Ok(Identity { uid, gid })
}

fn unknown(kind: &str, name: &str, rootfs: &Path) -> GraftError {
    GraftError::Config {
        message: format!("{kind} '{name}' is not listed in {}", rootfs.display()),
    }
}

/// Reads a colon-separated account database; a missing file reads as empty.
fn read_account_file(path: &Path) -> Result<Vec<Vec<String>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GraftError::io(path, e)),
    };
    Ok(content
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split(':').map(str::to_owned).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use rootgraft_image::image::{ImageConfig, LocalImage};

    use super::*;

    fn image(json: &str) -> LocalImage {
        LocalImage::new(
            ImageConfig::from_json(json).expect("config"),
            PathBuf::from("/unused"),
        )
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    fn rootfs_with_accounts() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("etc")).expect("mkdir");
        std::fs::write(
            dir.path().join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/sh\napp:x:1000:1001::/home/app:/bin/sh\n",
        )
        .expect("passwd");
        std::fs::write(dir.path().join("etc/group"), "root:x:0:\nstaff:x:50:app\n")
            .expect("group");
        dir
    }

    #[test]
    fn resolve_command_args_replace_cmd_after_entrypoint() {
        let img = image(r#"{"Entrypoint": ["/entry"], "Cmd": ["default"]}"#);
        assert_eq!(resolve_command(&img, &[]), strings(&["/entry", "default"]));
        assert_eq!(
            resolve_command(&img, &strings(&["custom", "-v"])),
            strings(&["/entry", "custom", "-v"])
        );
    }

    #[test]
    fn resolve_command_falls_back_to_shell_then_default() {
        let with_shell = image(r#"{"Shell": ["/bin/bash", "-l"]}"#);
        assert_eq!(resolve_command(&with_shell, &[]), strings(&["/bin/bash", "-l"]));
        let bare = image("{}");
        assert_eq!(resolve_command(&bare, &[]), strings(&["/bin/sh"]));
    }

    #[test]
    fn resolve_identity_numeric_and_named_forms() {
        let rootfs = rootfs_with_accounts();
        let root = rootfs.path();
        assert_eq!(resolve_identity("", root).expect("empty"), Identity { uid: 0, gid: 0 });
        assert_eq!(
            resolve_identity("app", root).expect("name"),
            Identity { uid: 1000, gid: 1001 }
        );
        assert_eq!(
            resolve_identity("app:staff", root).expect("name:group"),
            Identity { uid: 1000, gid: 50 }
        );
        assert_eq!(
            resolve_identity("1000", root).expect("uid"),
            Identity { uid: 1000, gid: 1001 }
        );
        assert_eq!(
            resolve_identity("42:7", root).expect("uid:gid"),
            Identity { uid: 42, gid: 7 }
        );
    }

    #[test]
    fn resolve_identity_unknown_name_is_config_error() {
        let rootfs = rootfs_with_accounts();
        let err = resolve_identity("ghost", rootfs.path()).expect_err("unknown");
        assert!(matches!(err, GraftError::Config { .. }));
        let err = resolve_identity("app:nogroup", rootfs.path()).expect_err("unknown group");
        assert!(matches!(err, GraftError::Config { .. }));
    }

    #[test]
    fn bind_mounts_keep_existing_excludes_and_volumes() {
        let host = tempfile::tempdir().expect("tempdir");
        let kept = host.path().join("kept");
        let volume = host.path().join("data");
        std::fs::create_dir_all(&kept).expect("mkdir");
        std::fs::create_dir_all(&volume).expect("mkdir");
        let patterns = vec![format!(
            "{}:{}:!{}",
            kept.display(),
            host.path().join("missing").display(),
            host.path().join("forced").display()
        )];
        let set = ExclusionSet::build(&[], &[], &patterns).expect("build");

        let binds = bind_mounts(&set, &[volume.clone(), kept.clone()]);
        assert_eq!(binds, vec![BindMount::identity(&volume), BindMount::identity(&kept)]);
    }

    #[test]
    fn to_args_orders_flags_before_command() {
        let plan = SandboxPlan {
            rootfs: PathBuf::from("/srv/rootfs"),
            binds: vec![BindMount::identity(Path::new("/proc"))],
            working_dir: PathBuf::from("/app"),
            identity: Identity { uid: 1000, gid: 50 },
            env: EnvMap::new(),
            command: strings(&["/entry", "run"]),
        };
        assert_eq!(
            plan.to_args(),
            strings(&[
                "--rootfs=/srv/rootfs",
                "--bind=/proc:/proc",
                "--cwd=/app",
                "--change-id=1000:50",
                "/entry",
                "run",
            ])
        );
    }

    #[test]
    fn locate_binary_missing_is_not_found() {
        let err = locate_binary("graft-no-such-sandbox-binary").expect_err("missing");
        assert!(matches!(err, GraftError::NotFound { .. }));
    }
}

//! Engine orchestrating snapshot, restore, apply, and environment operations.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use rootgraft_common::config::GraftConfig;
use rootgraft_common::error::Result;
use rootgraft_common::types::{CancelToken, EnvMap};
use rootgraft_core::enumerate::{enumerate, enumerate_paths};
use rootgraft_core::exclusion::{ExclusionSet, absolutize};
use rootgraft_core::filesystem::mount;
use rootgraft_core::purge::purge;
use rootgraft_image::archive::{RestoreStats, WriteStats, restore_archive, write_archive};
use rootgraft_image::image::{Image, image_env};
use rootgraft_image::source::ArchiveSource;

use crate::baseline;
use crate::env::{EnvReconciler, EvalDelta, current_env};
use crate::sandbox::{self, SandboxPlan};

/// Per-invocation environment options, already resolved against the config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvOptions {
    /// Image variables override session-local ones.
    pub overwrite: bool,
    /// Store the image environment as the new baseline.
    pub persist: bool,
}

/// Outcome of restoring an archive over a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// Atomic units removed before restoring.
    pub purged: usize,
    /// Restore counters.
    pub restored: RestoreStats,
}

/// Outcome of applying an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Filesystem part of the apply.
    pub filesystem: RestoreReport,
    /// Environment delta to evaluate in the caller's shell.
    pub env: EvalDelta,
}

/// Coordinates the filesystem and environment engines for one invocation.
///
/// Every path-taking operation resolves its own exclusion set: live mount
/// points under the operation root, the configured system directories,
/// configured and per-call patterns, and the executable directory.
#[derive(Debug, Clone)]
pub struct Engine {
    config: GraftConfig,
    exec_dir: PathBuf,
    cancel: CancelToken,
    current: EnvMap,
    mounts: Option<Vec<PathBuf>>,
}

impl Engine {
    /// Creates an engine reading the live process environment.
    #[must_use]
    pub fn new(config: GraftConfig, exec_dir: PathBuf, cancel: CancelToken) -> Self {
        Self {
            config,
            exec_dir,
            cancel,
            current: current_env(),
            mounts: None,
        }
    }

    /// Replaces the environment treated as the live one.
    #[must_use]
    pub fn with_current_env(mut self, current: EnvMap) -> Self {
        self.current = current;
        self
    }

    /// Replaces the live mount table with a fixed list.
    #[must_use]
    pub fn with_mount_points(mut self, mounts: Vec<PathBuf>) -> Self {
        self.mounts = Some(mounts);
        self
    }

    /// Returns the configuration this engine was built with.
    #[must_use]
    pub const fn config(&self) -> &GraftConfig {
        &self.config
    }

    /// Builds the exclusion set for an operation on `root`.
    ///
    /// Only mount points strictly inside `root` become boundaries, so a root
    /// that is itself a mount point (or lives on one) stays usable. With no
    /// root every live mount point is included.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read or a path cannot
    /// be made absolute.
    pub fn exclusions(
        &self,
        root: Option<&Path>,
        patterns: &[String],
        extra: &[PathBuf],
    ) -> Result<ExclusionSet> {
        let mut fixed = match &self.mounts {
            Some(mounts) => mounts.clone(),
            None => mount::live_mount_points()?,
        };
        if let Some(root) = root {
            fixed.retain(|mount| mount.as_path() != root && mount.starts_with(root));
        }
        fixed.push(self.exec_dir.clone());
        fixed.extend_from_slice(extra);

        let mut all_patterns = self.config.exclude.clone();
        all_patterns.extend_from_slice(patterns);

        ExclusionSet::build(&fixed, &self.config.system_dirs(), &all_patterns)
    }

    /// Archives `root` into `output`, skipping excluded subtrees.
    ///
    /// The output file is itself excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if enumeration or archiving fails; the output file
    /// is removed in that case.
    pub fn snapshot(&self, root: &Path, output: &Path, patterns: &[String]) -> Result<WriteStats> {
        let root = absolutize(root)?;
        let output = absolutize(output)?;
        let exclusions = self.exclusions(Some(&root), patterns, &[output.clone()])?;
        let units = enumerate(&root, &exclusions, &self.cancel)?;
        tracing::info!(
            root = %root.display(),
            output = %output.display(),
            units = units.len(),
            "taking snapshot"
        );
        write_archive(&root, &units, &output, &self.cancel)
    }

    /// Purges `dest` and restores the archive at `archive` over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be opened, or if purging or
    /// restoring fails.
    pub fn restore(&self, archive: &Path, dest: &Path, patterns: &[String]) -> Result<RestoreReport> {
        let archive = absolutize(archive)?;
        let mut source = ArchiveSource::open(&archive)?;
        self.restore_from(&mut source, dest, patterns, &[archive])
    }

    /// Purges `dest` and restores a seekable archive stream over it.
    ///
    /// `extra` paths are excluded on top of `patterns`. The baseline file and
    /// data directory are always excluded when they lie inside `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if purging or restoring fails.
    pub fn restore_from<R: Read + Seek>(
        &self,
        source: &mut R,
        dest: &Path,
        patterns: &[String],
        extra: &[PathBuf],
    ) -> Result<RestoreReport> {
        let dest = absolutize(dest)?;
        let mut protected = self.state_paths(&dest)?;
        protected.extend_from_slice(extra);
        let exclusions = self.exclusions(Some(&dest), patterns, &protected)?;
        let purged = purge(&dest, &exclusions, &self.cancel)?;
        let restored = restore_archive(source, &dest, &exclusions, &self.cancel)?;
        Ok(RestoreReport { purged, restored })
    }

    /// Transplants an image's rootfs onto `dest` and computes its
    /// environment delta.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem transplant fails or the baseline
    /// cannot be read or written.
    pub fn apply(
        &self,
        image: &dyn Image,
        dest: &Path,
        patterns: &[String],
        options: EnvOptions,
    ) -> Result<ApplyReport> {
        let sources = image
            .source_paths()
            .iter()
            .map(|path| absolutize(path))
            .collect::<Result<Vec<_>>>()?;
        let mut rootfs = image.rootfs()?;
        let filesystem = self.restore_from(&mut rootfs, dest, patterns, &sources)?;
        let env = self.env(image, options)?;
        tracing::info!(
            dest = %dest.display(),
            purged = filesystem.purged,
            unset = env.unset.len(),
            export = env.export.len(),
            "image applied"
        );
        Ok(ApplyReport { filesystem, env })
    }

    /// Computes the eval-script delta for an image, persisting the new
    /// baseline when requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the baseline cannot be read or written.
    pub fn env(&self, image: &dyn Image, options: EnvOptions) -> Result<EvalDelta> {
        let reconciler = self.reconciler(image, options)?;
        let delta = reconciler.compute_eval_delta();
        if options.persist {
            baseline::save(&self.config.baseline_file(), reconciler.target())?;
        }
        Ok(delta)
    }

    /// Computes the full replacement environment for running inside an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the baseline cannot be read.
    pub fn exec_env(&self, image: &dyn Image, options: EnvOptions) -> Result<EnvMap> {
        Ok(self.reconciler(image, options)?.compute_exec_env())
    }

    /// Builds the sandbox plan for running `args` (or the image command) in
    /// `rootfs`.
    ///
    /// # Errors
    ///
    /// Returns an error if exclusions cannot be resolved, the image user is
    /// unknown, or the baseline cannot be read.
    pub fn sandbox(
        &self,
        image: &dyn Image,
        rootfs: &Path,
        patterns: &[String],
        args: &[String],
        options: EnvOptions,
    ) -> Result<SandboxPlan> {
        let rootfs = absolutize(rootfs)?;
        let rootfs_pattern = format!("!{}", rootfs.display());
        let mut all_patterns = patterns.to_vec();
        all_patterns.push(rootfs_pattern);
        let exclusions = self.exclusions(None, &all_patterns, &[])?;

        let working_dir = match image.working_dir() {
            "" => PathBuf::from("/"),
            dir => PathBuf::from(dir),
        };
        let plan = SandboxPlan {
            binds: sandbox::bind_mounts(&exclusions, &image.volumes()),
            identity: sandbox::resolve_identity(image.user(), &rootfs)?,
            env: self.exec_env(image, options)?,
            command: sandbox::resolve_command(image, args),
            working_dir,
            rootfs,
        };
        tracing::debug!(binds = plan.binds.len(), command = ?plan.command, "sandbox plan ready");
        Ok(plan)
    }

    /// Lists the atomic paths an operation on `root` would touch.
    ///
    /// # Errors
    ///
    /// Returns an error if exclusions cannot be resolved or enumeration fails.
    pub fn list(&self, root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let root = absolutize(root)?;
        let exclusions = self.exclusions(Some(&root), patterns, &[])?;
        enumerate_paths(&root, &exclusions, &self.cancel)
    }

    /// Reconciler state lying strictly inside `root`.
    fn state_paths(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for path in [self.config.data_dir(), self.config.baseline_file()] {
            let path = absolutize(&path)?;
            if path.as_path() != root && path.starts_with(root) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn reconciler(&self, image: &dyn Image, options: EnvOptions) -> Result<EnvReconciler> {
        let baseline = baseline::load(&self.config.baseline_file())?;
        Ok(EnvReconciler::new(
            image_env(image),
            self.current.clone(),
            baseline,
            options.overwrite,
            self.exec_dir.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use rootgraft_image::image::{ImageConfig, LocalImage};

    use super::*;

    fn engine(data_dir: &Path) -> Engine {
        let config = GraftConfig {
            data_dir: Some(data_dir.to_path_buf()),
            system_dirs: Some(Vec::new()),
            ..GraftConfig::default()
        };
        Engine::new(config, PathBuf::from("/opt/graft/bin"), CancelToken::new())
            .with_mount_points(Vec::new())
            .with_current_env(EnvMap::new())
    }

    #[test]
    fn exclusions_keep_only_mounts_inside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let engine = engine(dir.path())
            .with_mount_points(vec![dir.path().to_path_buf(), root.join("proc")]);
        let set = engine.exclusions(Some(&root), &[], &[]).expect("exclusions");
        assert!(set.is_excluded(&root.join("proc/1")));
        assert!(!set.is_excluded(&root.join("etc")));
        assert!(set.is_excluded(Path::new("/opt/graft/bin/graft")));
    }

    #[test]
    fn env_persist_writes_target_as_baseline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(dir.path());
        let image = LocalImage::new(
            ImageConfig::from_json(r#"{"Env": ["FOO=new"]}"#).expect("config"),
            PathBuf::from("/unused"),
        );
        let options = EnvOptions {
            overwrite: false,
            persist: true,
        };
        let _ = engine.env(&image, options).expect("env");
        let saved = baseline::load(&engine.config().baseline_file()).expect("load");
        assert_eq!(saved.get("FOO").map(String::as_str), Some("new"));
        assert!(!saved.contains_key("PATH"));
    }

    #[test]
    fn sandbox_defaults_working_dir_and_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).expect("mkdir");
        let engine = engine(dir.path());
        let image = LocalImage::new(ImageConfig::default(), PathBuf::from("/unused"));

        let plan = engine
            .sandbox(&image, &rootfs, &[], &[], EnvOptions::default())
            .expect("plan");
        assert_eq!(plan.working_dir, PathBuf::from("/"));
        assert_eq!(plan.identity.to_string(), "0:0");
        assert_eq!(plan.command, vec!["/bin/sh".to_owned()]);
        assert_eq!(plan.env.get("PATH").map(String::as_str), Some("/opt/graft/bin"));
    }
}

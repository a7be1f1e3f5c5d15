//! Three-way environment reconciliation.
//!
//! Inputs are the image's `target` environment, the live `current`
//! environment, and the `baseline` exported by the previous apply. Keys in
//! `current` but not in `baseline` are session-local ("protected") and
//! survive unless `overwrite` is set. Baseline keys the user has not
//! changed since the last apply are "retractable" and get unset before the
//! new values are exported.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rootgraft_common::types::EnvMap;

/// Variable that always receives the executable directory suffix.
pub const PATH_KEY: &str = "PATH";

/// Pure reconciliation over three environment maps.
#[derive(Debug, Clone)]
pub struct EnvReconciler {
    target: EnvMap,
    current: EnvMap,
    baseline: EnvMap,
    overwrite: bool,
    exec_dir: PathBuf,
}

/// Variables to unset and export, in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalDelta {
    /// Keys to unset, sorted.
    pub unset: Vec<String>,
    /// Keys to export with their new values.
    pub export: EnvMap,
}

impl EnvReconciler {
    /// Creates a reconciler over the three maps.
    #[must_use]
    pub fn new(
        target: EnvMap,
        current: EnvMap,
        baseline: EnvMap,
        overwrite: bool,
        exec_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target,
            current,
            baseline,
            overwrite,
            exec_dir: exec_dir.into(),
        }
    }

    /// Returns the image environment this reconciler applies.
    #[must_use]
    pub const fn target(&self) -> &EnvMap {
        &self.target
    }

    /// Computes the shell delta that moves `current` to the target.
    ///
    /// A retractable key is left out of `unset` when the exported value
    /// already equals its current value, so that re-running against the
    /// resulting environment produces no unsets.
    #[must_use]
    pub fn compute_eval_delta(&self) -> EvalDelta {
        let mut export = self.target.clone();
        if !self.overwrite {
            export.retain(|key, _| !self.is_protected(key));
        }
        let _ = export.insert(PATH_KEY.to_owned(), self.augmented_path());

        let unset = self
            .retractable()
            .filter(|key| export.get(*key) != self.current.get(*key))
            .map(ToOwned::to_owned)
            .collect();

        EvalDelta { unset, export }
    }

    /// Computes a full replacement environment for a process image.
    ///
    /// Without `overwrite`, session-local keys win on conflict; with it,
    /// image keys win.
    #[must_use]
    pub fn compute_exec_env(&self) -> EnvMap {
        let protected = self
            .current
            .iter()
            .filter(|(key, _)| self.is_protected(key))
            .map(|(k, v)| (k.clone(), v.clone()));

        let mut env = if self.overwrite {
            let mut env: EnvMap = protected.collect();
            env.extend(self.target.clone());
            env
        } else {
            let mut env = self.target.clone();
            env.extend(protected);
            env
        };
        let _ = env.insert(PATH_KEY.to_owned(), self.augmented_path());
        env
    }

    fn is_protected(&self, key: &str) -> bool {
        self.current.contains_key(key) && !self.baseline.contains_key(key)
    }

    fn retractable(&self) -> impl Iterator<Item = &str> {
        self.baseline
            .iter()
            .filter(|(key, value)| self.current.get(*key) == Some(*value))
            .map(|(key, _)| key.as_str())
    }

    fn augmented_path(&self) -> String {
        join_path(
            self.target.get(PATH_KEY).map_or("", String::as_str),
            &self.exec_dir,
        )
    }
}

/// Appends `dir` to a colon-separated search path.
///
/// An empty `path` yields `dir` alone rather than a leading `:`, which the
/// shell would read as the working directory.
#[must_use]
pub fn join_path(path: &str, dir: &Path) -> String {
    if path.is_empty() {
        dir.display().to_string()
    } else {
        format!("{path}:{}", dir.display())
    }
}

impl EvalDelta {
    /// Renders the delta as a script for `eval` or `source`.
    ///
    /// Keys that are not valid shell identifiers are dropped with a warning.
    #[must_use]
    pub fn render(&self) -> String {
        let mut script = String::new();

        let unset: Vec<&str> = self
            .unset
            .iter()
            .map(String::as_str)
            .filter(|key| valid_name(key))
            .collect();
        if !unset.is_empty() {
            let _ = writeln!(script, "unset {};", unset.join(" "));
        }

        let exports: Vec<String> = self
            .export
            .iter()
            .filter(|(key, _)| valid_name(key))
            .map(|(key, value)| format!("{key}=\"{}\"", shell_escape(value)))
            .collect();
        if !exports.is_empty() {
            let _ = writeln!(script, "export {};", exports.join(" "));
        }
        script
    }

    /// Returns whether the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unset.is_empty() && self.export.is_empty()
    }

    /// Applies the delta to `env`, as evaluating the script would.
    pub fn apply_to(&self, env: &mut EnvMap) {
        for key in &self.unset {
            let _ = env.remove(key);
        }
        env.extend(self.export.clone());
    }
}

fn valid_name(key: &str) -> bool {
    let mut chars = key.chars();
    let ok = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if !ok {
        tracing::warn!(key, "skipping variable with a name the shell cannot assign");
    }
    ok
}

/// Escapes the characters that stay special inside double quotes.
fn shell_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Captures the live process environment, skipping non-UTF-8 entries.
#[must_use]
pub fn current_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

//! Persisted environment baseline.
//!
//! One `KEY="VALUE"` line per variable. Inside the quotes, backslash,
//! double quote, and line breaks are escaped so any value round-trips.

use std::io::Write;
use std::path::Path;

use rootgraft_common::error::{GraftError, Result};
use rootgraft_common::types::EnvMap;

/// Loads the baseline, returning an empty map if the file does not exist.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read, or `Config` if a line
/// is malformed.
pub fn load(path: &Path) -> Result<EnvMap> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no baseline yet");
            return Ok(EnvMap::new());
        }
        Err(e) => return Err(GraftError::io(path, e)),
    };

    let mut env = EnvMap::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = parse_line(line).ok_or_else(|| GraftError::Config {
            message: format!("malformed baseline line {} in {}", index + 1, path.display()),
        })?;
        let _ = env.insert(key, value);
    }
    tracing::debug!(path = %path.display(), vars = env.len(), "baseline loaded");
    Ok(env)
}

/// Replaces the baseline file with `env`.
///
/// The new content is written to a sibling temporary file and renamed over
/// the old one, so readers never see a partial baseline.
///
/// # Errors
///
/// Returns an I/O error if the directory or file cannot be written.
pub fn save(path: &Path, env: &EnvMap) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| GraftError::io(parent, e))?;

    let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(|e| GraftError::io(parent, e))?;
    staged
        .write_all(render(env).as_bytes())
        .map_err(|e| GraftError::io(staged.path(), e))?;
    let _ = staged
        .persist(path)
        .map_err(|e| GraftError::io(path, e.error))?;
    tracing::info!(path = %path.display(), vars = env.len(), "baseline saved");
    Ok(())
}

/// Renders `env` in baseline file format.
#[must_use]
pub fn render(env: &EnvMap) -> String {
    let mut out = String::new();
    for (key, value) in env {
        out.push_str(key);
        out.push_str("=\"");
        for c in value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                other => out.push(other),
            }
        }
        out.push_str("\"\n");
    }
    out
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let (key, raw) = line.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    let Some(quoted) = raw.strip_prefix('"') else {
        return Some((key.to_owned(), raw.to_owned()));
    };

    let mut value = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                return chars
                    .as_str()
                    .is_empty()
                    .then(|| (key.to_owned(), value));
            }
            '\\' => match chars.next()? {
                'n' => value.push('\n'),
                'r' => value.push('\r'),
                other => value.push(other),
            },
            other => value.push(other),
        }
    }
    None
}

//! Process-once file marker
//!
//! A loaded file is renamed to `.<name>` in its own directory. Discovery never
//! matches dot-files, so a marked file is not picked up again. A same-directory
//! rename is a single `rename(2)`, atomic for any other process scanning the
//! directory.

use memc_common::{MemcError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gate::Verdict;

/// Prefix that marks a file as already processed.
pub const MARKER_PREFIX: char = '.';

/// When a finished file gets marked
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum MarkPolicy {
    /// Mark every file whose pipeline finished, whatever its error rate
    #[default]
    Always,
    /// Mark only accepted files; rejected and empty ones are retried next run
    OnSuccess,
}

impl MarkPolicy {
    pub fn should_mark(self, verdict: &Verdict) -> bool {
        match self {
            MarkPolicy::Always => true,
            MarkPolicy::OnSuccess => verdict.is_success(),
        }
    }
}

impl std::fmt::Display for MarkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkPolicy::Always => write!(f, "always"),
            MarkPolicy::OnSuccess => write!(f, "on-success"),
        }
    }
}

/// Whether the file name already carries the marker
pub fn is_marked(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(MARKER_PREFIX))
        .unwrap_or(false)
}

/// `dir/name` -> `dir/.name`
pub fn marked_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        MemcError::Parse(format!("'{}' has no file name to mark", path.display()))
    })?;

    let mut marked = std::ffi::OsString::from(MARKER_PREFIX.to_string());
    marked.push(name);
    Ok(path.with_file_name(marked))
}

/// Rename `path` to its marked name and return the new path
pub async fn mark_processed(path: &Path) -> Result<PathBuf> {
    let target = marked_path(path)?;
    tokio::fs::rename(path, &target)
        .await
        .map_err(|e| MemcError::file(path, e))?;
    Ok(target)
}

// SPDX-License-Identifier: Apache-2.0

mod fs;
mod process;

pub use fs::{RealFs, RealWalk};
pub use process::RealProcessRunner;

use std::path::{Path, PathBuf};

use stackaudit_core::AdapterError;
use stackaudit_policies::POLICY_FILE_NAME;

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Nearest ancestor of `start` holding a `stackaudit.toml` or a `.git` entry.
pub fn discover_repo_root(start: &Path) -> Result<PathBuf, AdapterError> {
    let mut current = start.canonicalize().map_err(|err| AdapterError::Io {
        op: "canonicalize",
        path: start.to_path_buf(),
        detail: err.to_string(),
    })?;
    loop {
        if current.join(POLICY_FILE_NAME).is_file() || current.join(".git").exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(AdapterError::PathViolation {
                path: start.to_path_buf(),
                detail: format!(
                    "no repository root above this directory (looked for {POLICY_FILE_NAME} or .git); pass --repo-root"
                ),
            });
        }
    }
}

/// Canonical form of an explicit `--repo-root`, which must be a directory.
pub fn resolve_repo_root(explicit: &Path) -> Result<PathBuf, AdapterError> {
    let root = explicit.canonicalize().map_err(|err| AdapterError::Io {
        op: "canonicalize",
        path: explicit.to_path_buf(),
        detail: err.to_string(),
    })?;
    if !root.is_dir() {
        return Err(AdapterError::PathViolation {
            path: explicit.to_path_buf(),
            detail: "repository root is not a directory".to_string(),
        });
    }
    Ok(root)
}

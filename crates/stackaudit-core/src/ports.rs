// SPDX-License-Identifier: Apache-2.0

//! IO boundaries consumed by the engine. The CLI crate provides the real
//! implementations; tests substitute in-memory ones.

use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    PathViolation {
        path: PathBuf,
        detail: String,
    },
    Io {
        op: &'static str,
        path: PathBuf,
        detail: String,
    },
    Process {
        program: String,
        detail: String,
    },
    Timeout {
        program: String,
        seconds: u64,
    },
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PathViolation { path, detail } => {
                write!(f, "path violation: {} ({detail})", path.display())
            }
            Self::Io { op, path, detail } => {
                write!(f, "io error: {op} {} ({detail})", path.display())
            }
            Self::Process { program, detail } => write!(f, "process error: {program} ({detail})"),
            Self::Timeout { program, seconds } => {
                write!(f, "process `{program}` timed out after {seconds}s")
            }
        }
    }
}

impl std::error::Error for AdapterError {}

pub trait Fs: Send + Sync {
    fn read_text(&self, repo_root: &Path, path: &Path) -> Result<String, AdapterError>;
    fn is_dir(&self, repo_root: &Path, path: &Path) -> bool;
}

pub trait Walk: Send + Sync {
    /// Every file under `repo_root` as a `/`-separated relative path, sorted.
    /// Directories for which `skip_dir` returns true are not entered.
    fn walk_files(
        &self,
        repo_root: &Path,
        skip_dir: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, AdapterError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCapture {
    pub program: String,
    pub args: Vec<String>,
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait ProcessRunner: Send + Sync {
    fn run_captured(
        &self,
        program: &str,
        args: &[String],
        repo_root: &Path,
        timeout: Duration,
    ) -> Result<CommandCapture, AdapterError>;
}

#[derive(Clone, Copy)]
pub struct AdapterSet<'a> {
    pub fs: &'a dyn Fs,
    pub walk: &'a dyn Walk,
    pub process: &'a dyn ProcessRunner,
}

// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};

use stackaudit_core::{AdapterError, Fs, Walk};

use super::normalize_line_endings;

fn join_root(repo_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo_root.join(path)
    }
}

pub fn canonicalize_from_repo_root(repo_root: &Path, path: &Path) -> Result<PathBuf, AdapterError> {
    let joined = join_root(repo_root, path);
    joined.canonicalize().map_err(|err| AdapterError::Io {
        op: "canonicalize",
        path: joined,
        detail: err.to_string(),
    })
}

#[derive(Debug, Default)]
pub struct RealFs;

impl Fs for RealFs {
    fn read_text(&self, repo_root: &Path, path: &Path) -> Result<String, AdapterError> {
        let target = canonicalize_from_repo_root(repo_root, path)?;
        let text = fs::read_to_string(&target).map_err(|err| AdapterError::Io {
            op: "read_to_string",
            path: target,
            detail: err.to_string(),
        })?;
        Ok(normalize_line_endings(&text))
    }

    fn is_dir(&self, repo_root: &Path, path: &Path) -> bool {
        join_root(repo_root, path).is_dir()
    }
}

/// Breadth-first directory walk. Symlinked directories are not followed.
#[derive(Debug, Default)]
pub struct RealWalk;

impl Walk for RealWalk {
    fn walk_files(
        &self,
        repo_root: &Path,
        skip_dir: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, AdapterError> {
        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::from([String::new()]);
        while let Some(rel) = queue.pop_front() {
            let dir = repo_root.join(&rel);
            let entries = fs::read_dir(&dir).map_err(|err| AdapterError::Io {
                op: "read_dir",
                path: dir.clone(),
                detail: err.to_string(),
            })?;
            let mut children = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|err| AdapterError::Io {
                    op: "read_dir_entry",
                    path: dir.clone(),
                    detail: err.to_string(),
                })?;
                let file_type = entry.file_type().map_err(|err| AdapterError::Io {
                    op: "file_type",
                    path: entry.path(),
                    detail: err.to_string(),
                })?;
                let name = entry.file_name().to_string_lossy().to_string();
                let child = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };
                children.push((child, file_type));
            }
            children.sort_by(|a, b| a.0.cmp(&b.0));
            for (child, file_type) in children {
                if file_type.is_dir() {
                    if !skip_dir(&child) {
                        queue.push_back(child);
                    }
                } else if file_type.is_file() || file_type.is_symlink() {
                    out.push(child);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, text).expect("write");
    }

    #[test]
    fn walk_is_sorted_and_honours_skip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(root, "services/svc-b/Dockerfile", "FROM scratch\n");
        write(root, "services/svc-a/Dockerfile", "FROM scratch\n");
        write(root, "node_modules/pkg/Dockerfile", "FROM scratch\n");
        write(root, "README.md", "# repo\n");
        let files = RealWalk
            .walk_files(root, &|dir| dir == "node_modules")
            .expect("walk");
        assert_eq!(
            files,
            vec![
                "README.md",
                "services/svc-a/Dockerfile",
                "services/svc-b/Dockerfile",
            ]
        );
    }

    #[test]
    fn read_text_normalizes_line_endings() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "Dockerfile", "FROM scratch\r\nUSER app\r\n");
        let text = RealFs
            .read_text(tmp.path(), Path::new("Dockerfile"))
            .expect("read");
        assert_eq!(text, "FROM scratch\nUSER app\n");
        assert!(RealFs
            .read_text(tmp.path(), Path::new("missing/Dockerfile"))
            .is_err());
    }
}

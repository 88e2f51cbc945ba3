use std::collections::BTreeMap;
use std::path::Path;

use crate::ports::{AdapterError, Fs, Walk};

/// In-memory repository keyed by `/`-separated relative file path.
/// `None` marks a file that exists but fails to read.
#[derive(Debug, Default, Clone)]
pub(crate) struct MemoryRepo {
    files: BTreeMap<String, Option<String>>,
}

fn key(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    text.trim_start_matches("./").trim_end_matches('/').to_string()
}

impl MemoryRepo {
    pub(crate) fn with(mut self, path: &str, text: &str) -> Self {
        self.files.insert(path.to_string(), Some(text.to_string()));
        self
    }

    pub(crate) fn with_unreadable(mut self, path: &str) -> Self {
        self.files.insert(path.to_string(), None);
        self
    }
}

impl Fs for MemoryRepo {
    fn read_text(&self, _repo_root: &Path, path: &Path) -> Result<String, AdapterError> {
        let detail = match self.files.get(&key(path)) {
            Some(Some(text)) => return Ok(text.clone()),
            Some(None) => "stream did not contain valid UTF-8",
            None => "not found",
        };
        Err(AdapterError::Io {
            op: "read",
            path: path.to_path_buf(),
            detail: detail.to_string(),
        })
    }

    fn is_dir(&self, _repo_root: &Path, path: &Path) -> bool {
        let prefix = format!("{}/", key(path));
        self.files.keys().any(|file| file.starts_with(&prefix))
    }
}

impl Walk for MemoryRepo {
    fn walk_files(
        &self,
        _repo_root: &Path,
        skip_dir: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, AdapterError> {
        Ok(self
            .files
            .keys()
            .filter(|file| {
                let segments = file.split('/').collect::<Vec<_>>();
                !(1..segments.len()).any(|depth| skip_dir(&segments[..depth].join("/")))
            })
            .cloned()
            .collect())
    }
}

// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use stackaudit_model::{ManifestError, ServiceRecord};
use stackaudit_policies::AuditPolicy;
use tracing::{debug, warn};

use crate::error::AuditError;
use crate::pool::map_bounded;
use crate::ports::{Fs, Walk};

/// Directory name used for manifests at the repository root.
pub const ROOT_DIR: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSource {
    pub dir: String,
    pub path: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirMatch<'a> {
    Service(&'a ServiceRecord),
    /// Below a service directory; belongs to that service and is not parsed.
    Nested(&'a ServiceRecord),
    Unmatched,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Manifest of each service, keyed by service name.
    pub manifests: BTreeMap<String, ManifestSource>,
    /// Unregistered manifest directories and the manifest found in each.
    pub orphans: BTreeMap<String, String>,
    /// Declared service paths that exist as directories.
    pub existing_dirs: BTreeSet<String>,
    /// Owned manifests that exist but could not be read, keyed by service.
    pub unreadable: BTreeMap<String, ManifestError>,
}

pub fn wildcard_matches(pattern: &str, value: &str) -> bool {
    let parts = pattern.split('*').collect::<Vec<_>>();
    if parts.len() == 1 {
        return pattern == value;
    }
    let first = parts[0];
    let last = parts[parts.len() - 1];
    if value.len() < first.len() + last.len() || !value.starts_with(first) || !value.ends_with(last)
    {
        return false;
    }
    let end = value.len() - last.len();
    let mut cursor = first.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match value[cursor..end].find(part) {
            Some(pos) => cursor += pos + part.len(),
            None => return false,
        }
    }
    true
}

/// A directory is ignored when a pattern matches its name or its relative path.
pub fn is_ignored<S: AsRef<str>>(rel_dir: &str, patterns: &[S]) -> bool {
    let name = rel_dir.rsplit('/').next().unwrap_or(rel_dir);
    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref();
        wildcard_matches(pattern, name) || wildcard_matches(pattern, rel_dir)
    })
}

pub fn match_manifest_dir<'a>(dir: &str, records: &'a [ServiceRecord]) -> DirMatch<'a> {
    if let Some(record) = records.iter().find(|r| r.declared_path == dir) {
        return DirMatch::Service(record);
    }
    records
        .iter()
        .filter(|r| {
            dir.strip_prefix(r.declared_path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|r| r.declared_path.len())
        .map_or(DirMatch::Unmatched, DirMatch::Nested)
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => (ROOT_DIR, path),
    }
}

/// Manifest path per directory. When a directory holds several manifest
/// names, the one listed first in the policy wins.
pub fn discover_manifests(
    walk: &dyn Walk,
    repo_root: &Path,
    policy: &AuditPolicy,
) -> Result<BTreeMap<String, String>, AuditError> {
    let skip = |rel: &str| is_ignored(rel, &policy.ignore);
    let files = walk.walk_files(repo_root, &skip)?;
    let mut found = BTreeMap::<String, (usize, String)>::new();
    for file in files {
        let (dir, name) = split_parent(&file);
        let Some(rank) = policy.manifest_names.iter().position(|m| m == name) else {
            continue;
        };
        let better = found.get(dir).is_none_or(|(best, _)| rank < *best);
        if better {
            found.insert(dir.to_string(), (rank, file.clone()));
        }
    }
    Ok(found
        .into_iter()
        .map(|(dir, (_, path))| (dir, path))
        .collect())
}

pub fn scan_repository(
    fs: &dyn Fs,
    walk: &dyn Walk,
    repo_root: &Path,
    records: &[ServiceRecord],
    policy: &AuditPolicy,
    workers: usize,
) -> Result<ScanResult, AuditError> {
    let discovered = discover_manifests(walk, repo_root, policy)?;
    let mut result = ScanResult::default();
    let mut owned = Vec::new();
    for (dir, path) in discovered {
        match match_manifest_dir(&dir, records) {
            DirMatch::Service(record) => {
                debug!(service = %record.name, manifest = %path, "discovered service manifest");
                owned.push((record.name.clone(), dir, path));
            }
            DirMatch::Nested(record) => {
                debug!(service = %record.name, manifest = %path, "ignoring nested manifest");
            }
            DirMatch::Unmatched => {
                debug!(manifest = %path, "discovered unregistered manifest");
                result.orphans.insert(dir, path);
            }
        }
    }

    for record in records {
        if fs.is_dir(repo_root, Path::new(&record.declared_path)) {
            result.existing_dirs.insert(record.declared_path.clone());
        }
    }

    let read = map_bounded(owned, workers, |(service, dir, path)| {
        let text = fs.read_text(repo_root, Path::new(&path));
        (service, dir, path, text)
    });
    for (service, dir, path, text) in read {
        match text {
            Ok(text) => {
                result.manifests.insert(service, ManifestSource { dir, path, text });
            }
            Err(err) => {
                warn!(service = %service, manifest = %path, error = %err, "manifest unreadable");
                result.unreadable.insert(
                    service,
                    ManifestError::Unreadable {
                        file: path,
                        detail: err.to_string(),
                    },
                );
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRepo;
    use stackaudit_model::Tier;

    fn record(name: &str, path: &str) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            codename: name.to_string(),
            tier: Tier::Application,
            declared_path: path.to_string(),
            declared_image: format!("acme/{name}:1.0"),
            row: 1,
        }
    }

    #[test]
    fn wildcard_patterns() {
        assert!(wildcard_matches("*", "anything"));
        assert!(wildcard_matches("node_modules", "node_modules"));
        assert!(wildcard_matches("*.egg-info", "pkg.egg-info"));
        assert!(wildcard_matches("build-*", "build-cache"));
        assert!(wildcard_matches("a*b*c", "a-x-b-y-c"));
        assert!(!wildcard_matches("a*b*c", "a-x-c-y-b"));
        assert!(!wildcard_matches("ab*ba", "aba"));
    }

    #[test]
    fn ignore_patterns_match_names_and_paths() {
        let patterns = ["target", "services/legacy-*"];
        assert!(is_ignored("crates/x/target", &patterns));
        assert!(is_ignored("services/legacy-billing", &patterns));
        assert!(!is_ignored("services/billing", &patterns));
    }

    #[test]
    fn classifies_manifest_directories() {
        let records = vec![record("svc-a", "services/svc-a"), record("svc-ab", "services/svc-ab")];
        assert!(matches!(
            match_manifest_dir("services/svc-a", &records),
            DirMatch::Service(r) if r.name == "svc-a"
        ));
        assert!(matches!(
            match_manifest_dir("services/svc-ab/tools", &records),
            DirMatch::Nested(r) if r.name == "svc-ab"
        ));
        assert_eq!(match_manifest_dir("services/svc-abc", &records), DirMatch::Unmatched);
    }

    #[test]
    fn scan_separates_owned_nested_and_orphan_manifests() {
        let repo = MemoryRepo::default()
            .with("services/svc-a/Dockerfile", "FROM alpine:3.20\n")
            .with("services/svc-a/Containerfile", "FROM alpine:3.19\n")
            .with("services/svc-a/tools/Dockerfile", "FROM busybox:1\n")
            .with("services/svc-c/Dockerfile", "FROM alpine:3.20\n")
            .with("services/svc-b/README.md", "no manifest\n")
            .with("node_modules/pkg/Dockerfile", "FROM node:20\n");
        let records = vec![
            record("svc-a", "services/svc-a"),
            record("svc-b", "services/svc-b"),
            record("svc-x", "services/svc-x"),
        ];
        let policy = AuditPolicy::default();
        let scan = scan_repository(&repo, &repo, Path::new("/repo"), &records, &policy, 2)
            .expect("scan");
        assert_eq!(scan.manifests.len(), 1);
        let svc_a = &scan.manifests["svc-a"];
        assert_eq!(svc_a.path, "services/svc-a/Dockerfile");
        assert_eq!(svc_a.text, "FROM alpine:3.20\n");
        assert_eq!(
            scan.orphans.keys().cloned().collect::<Vec<_>>(),
            vec!["services/svc-c".to_string()]
        );
        assert_eq!(
            scan.existing_dirs.iter().cloned().collect::<Vec<_>>(),
            vec!["services/svc-a".to_string(), "services/svc-b".to_string()]
        );
        assert!(scan.unreadable.is_empty());
    }

    #[test]
    fn unreadable_manifest_is_recorded_and_the_scan_continues() {
        let repo = MemoryRepo::default()
            .with_unreadable("services/svc-a/Dockerfile")
            .with("services/svc-b/Dockerfile", "FROM alpine:3.20\n");
        let records = vec![
            record("svc-a", "services/svc-a"),
            record("svc-b", "services/svc-b"),
        ];
        let scan = scan_repository(
            &repo,
            &repo,
            Path::new("/repo"),
            &records,
            &AuditPolicy::default(),
            2,
        )
        .expect("scan");
        assert_eq!(scan.manifests.keys().collect::<Vec<_>>(), vec!["svc-b"]);
        let error = &scan.unreadable["svc-a"];
        assert_eq!(error.code(), "MANIFEST_UNREADABLE");
        assert_eq!(error.file(), "services/svc-a/Dockerfile");
        assert!(error.message().contains("valid UTF-8"));
    }
}

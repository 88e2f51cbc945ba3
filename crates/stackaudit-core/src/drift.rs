// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use stackaudit_model::{DriftIssue, ImageRef, Manifest, NamingRule, ServiceRecord};
use stackaudit_policies::AuditPolicy;

use crate::manifest::effective_labels;
use crate::scanner::ScanResult;

fn same_repository(declared: &str, labelled: &str) -> bool {
    match (ImageRef::parse(declared), ImageRef::parse(labelled)) {
        (Ok(a), Ok(b)) => a.repository_key() == b.repository_key(),
        _ => declared == labelled,
    }
}

fn naming_issues(
    record: &ServiceRecord,
    manifest: Option<&Manifest>,
    policy: &AuditPolicy,
) -> Vec<DriftIssue> {
    let mut issues = Vec::new();
    let labelled = manifest.and_then(|m| {
        let last = m.final_stage()?;
        effective_labels(m, last.index)
            .remove(&policy.image_label)
            .map(|value| (m.path.clone(), value))
    });
    if let Some((path, found)) = labelled {
        if !same_repository(&record.declared_image, &found) {
            issues.push(DriftIssue::NamingMismatch {
                service: record.clone(),
                rule: NamingRule::ImageLabel,
                expected: record.declared_image.clone(),
                found,
                manifest: Some(path),
            });
        }
    }
    if policy.naming.image_basename_matches_name {
        if let Ok(image) = ImageRef::parse(&record.declared_image) {
            if image.basename() != record.name {
                issues.push(DriftIssue::NamingMismatch {
                    service: record.clone(),
                    rule: NamingRule::ImageBasename,
                    expected: record.name.clone(),
                    found: image.basename().to_string(),
                    manifest: None,
                });
            }
        }
    }
    issues
}

/// Registry versus filesystem. Every record and every orphan is examined;
/// `parsed` holds the manifests that parsed cleanly, keyed by service name.
pub fn detect_drift(
    records: &[ServiceRecord],
    scan: &ScanResult,
    parsed: &BTreeMap<String, Manifest>,
    policy: &AuditPolicy,
) -> Vec<DriftIssue> {
    let mut issues = Vec::new();
    for record in records {
        if !scan.existing_dirs.contains(&record.declared_path) {
            issues.push(DriftIssue::MissingDirectory {
                service: record.clone(),
            });
        } else if !scan.manifests.contains_key(&record.name)
            && !scan.unreadable.contains_key(&record.name)
        {
            issues.push(DriftIssue::MissingManifest {
                service: record.clone(),
            });
        }
        issues.extend(naming_issues(record, parsed.get(&record.name), policy));
    }
    for (dir, manifest) in &scan.orphans {
        issues.push(DriftIssue::OrphanDirectory {
            path: dir.clone(),
            manifest: manifest.clone(),
        });
    }
    issues
}

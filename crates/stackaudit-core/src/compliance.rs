// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use stackaudit_model::{
    codes, ComplianceFinding, DriftIssue, FindingSource, MalformedRegistryEntry, ManifestError,
    Severity, StructuralIssue,
};

use crate::external::ExternalFindings;

pub fn default_severity(code: &str) -> Severity {
    match code {
        codes::MISSING_HEALTHCHECK => Severity::Low,
        codes::ORPHAN_DIRECTORY
        | codes::NAMING_MISMATCH
        | codes::UNPINNED_BASE
        | codes::ROOT_USER => Severity::Medium,
        _ => Severity::High,
    }
}

/// Everything the aggregator merges. Manifest-level entries carry the name
/// of the service owning the manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindingInputs<'a> {
    pub registry_path: &'a str,
    pub registry_errors: &'a [MalformedRegistryEntry],
    pub manifest_errors: &'a [(String, ManifestError)],
    pub drift: &'a [DriftIssue],
    pub structural: &'a [(String, StructuralIssue)],
    pub external: Option<&'a ExternalFindings>,
}

fn finding(
    service: String,
    source: FindingSource,
    code: &str,
    severity: Severity,
    message: String,
) -> ComplianceFinding {
    ComplianceFinding {
        service,
        severity,
        source,
        code: code.to_string(),
        message,
        path: None,
        line: None,
    }
}

/// Severity descending, then service, code, path, line, message.
pub fn sort_findings(findings: &mut [ComplianceFinding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.service.cmp(&b.service))
            .then_with(|| a.code.cmp(&b.code))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.message.cmp(&b.message))
    });
}

pub fn aggregate(
    inputs: &FindingInputs<'_>,
    overrides: &BTreeMap<String, Severity>,
) -> Vec<ComplianceFinding> {
    let mut findings = Vec::new();

    for entry in inputs.registry_errors {
        let service = entry
            .name
            .clone()
            .unwrap_or_else(|| format!("registry-row-{}", entry.row));
        let code = codes::MALFORMED_REGISTRY_ENTRY;
        let message = format!("row {}: {}", entry.row, entry.reason);
        findings.push(ComplianceFinding {
            path: Some(inputs.registry_path.to_string()),
            line: entry.line,
            ..finding(service, FindingSource::Registry, code, default_severity(code), message)
        });
    }
    for (service, error) in inputs.manifest_errors {
        let code = error.code();
        findings.push(ComplianceFinding {
            path: Some(error.file().to_string()),
            line: error.line(),
            ..finding(
                service.clone(),
                FindingSource::Manifest,
                code,
                default_severity(code),
                error.message(),
            )
        });
    }
    for issue in inputs.drift {
        let code = issue.code();
        findings.push(ComplianceFinding {
            path: Some(issue.path().to_string()),
            ..finding(
                issue.subject().to_string(),
                FindingSource::Drift,
                code,
                default_severity(code),
                issue.message(),
            )
        });
    }
    for (service, issue) in inputs.structural {
        let code = issue.code();
        findings.push(ComplianceFinding {
            path: Some(issue.file().to_string()),
            line: issue.line(),
            ..finding(
                service.clone(),
                FindingSource::Manifest,
                code,
                default_severity(code),
                issue.message(),
            )
        });
    }
    if let Some(external) = inputs.external {
        for record in &external.findings {
            let code = match record.source {
                FindingSource::ExternalSecurity => codes::EXTERNAL_SECURITY,
                _ => codes::EXTERNAL_LINT,
            };
            findings.push(finding(
                record.service.clone(),
                record.source,
                code,
                record.severity,
                record.message.clone(),
            ));
        }
        for record in &external.invalid {
            let code = codes::EXTERNAL_RECORD_INVALID;
            let service = record
                .service
                .clone()
                .unwrap_or_else(|| record.origin.clone());
            findings.push(ComplianceFinding {
                path: Some(record.origin.clone()),
                ..finding(
                    service,
                    record.source,
                    code,
                    default_severity(code),
                    format!("record {}: {}", record.index, record.reason),
                )
            });
        }
    }

    for finding in &mut findings {
        if let Some(severity) = overrides.get(&finding.code) {
            finding.severity = *severity;
        }
    }
    sort_findings(&mut findings);
    findings
}

// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::service::ServiceRecord;

/// Stable finding codes. Configuration overrides refer to these strings.
pub mod codes {
    pub const MALFORMED_REGISTRY_ENTRY: &str = "REGISTRY_MALFORMED_ENTRY";
    pub const UNDEFINED_STAGE_REFERENCE: &str = "MANIFEST_UNDEFINED_STAGE_REFERENCE";
    pub const DUPLICATE_STAGE_ALIAS: &str = "MANIFEST_DUPLICATE_STAGE_ALIAS";
    pub const INSTRUCTION_BEFORE_FROM: &str = "MANIFEST_INSTRUCTION_BEFORE_FROM";
    pub const MALFORMED_FROM: &str = "MANIFEST_MALFORMED_FROM";
    pub const EMPTY_MANIFEST: &str = "MANIFEST_EMPTY";
    pub const UNREADABLE_MANIFEST: &str = "MANIFEST_UNREADABLE";
    pub const UNPINNED_BASE: &str = "MANIFEST_UNPINNED_BASE";
    pub const ROOT_USER: &str = "MANIFEST_ROOT_USER";
    pub const MISSING_HEALTHCHECK: &str = "MANIFEST_MISSING_HEALTHCHECK";
    pub const MISSING_DIRECTORY: &str = "DRIFT_MISSING_DIRECTORY";
    pub const MISSING_MANIFEST: &str = "DRIFT_MISSING_MANIFEST";
    pub const ORPHAN_DIRECTORY: &str = "DRIFT_ORPHAN_DIRECTORY";
    pub const NAMING_MISMATCH: &str = "DRIFT_NAMING_MISMATCH";
    pub const EXTERNAL_LINT: &str = "EXTERNAL_LINT";
    pub const EXTERNAL_SECURITY: &str = "EXTERNAL_SECURITY";
    pub const EXTERNAL_RECORD_INVALID: &str = "EXTERNAL_RECORD_INVALID";

    pub const ALL: [&str; 17] = [
        MALFORMED_REGISTRY_ENTRY,
        UNDEFINED_STAGE_REFERENCE,
        DUPLICATE_STAGE_ALIAS,
        INSTRUCTION_BEFORE_FROM,
        MALFORMED_FROM,
        EMPTY_MANIFEST,
        UNREADABLE_MANIFEST,
        UNPINNED_BASE,
        ROOT_USER,
        MISSING_HEALTHCHECK,
        MISSING_DIRECTORY,
        MISSING_MANIFEST,
        ORPHAN_DIRECTORY,
        NAMING_MISMATCH,
        EXTERNAL_LINT,
        EXTERNAL_SECURITY,
        EXTERNAL_RECORD_INVALID,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(value: &str) -> Result<Self, String> {
        let raw = value.trim();
        match raw.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(format!(
                "invalid severity `{raw}`: expected CRITICAL, HIGH, MEDIUM or LOW"
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Findings at or above MEDIUM fail a validation run.
    pub fn is_actionable(self) -> bool {
        self >= Self::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingSource {
    Registry,
    Manifest,
    Drift,
    ExternalLint,
    ExternalSecurity,
}

impl FindingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Manifest => "manifest",
            Self::Drift => "drift",
            Self::ExternalLint => "external-lint",
            Self::ExternalSecurity => "external-security",
        }
    }
}

impl fmt::Display for FindingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub service: String,
    pub severity: Severity,
    pub source: FindingSource,
    pub code: String,
    pub message: String,
    pub path: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingRule {
    /// The final stage labels itself with a different image.
    ImageLabel,
    /// The declared image's last segment differs from the service name.
    ImageBasename,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftIssue {
    MissingDirectory {
        service: ServiceRecord,
    },
    MissingManifest {
        service: ServiceRecord,
    },
    OrphanDirectory {
        path: String,
        manifest: String,
    },
    NamingMismatch {
        service: ServiceRecord,
        rule: NamingRule,
        expected: String,
        found: String,
        manifest: Option<String>,
    },
}

impl DriftIssue {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingDirectory { .. } => codes::MISSING_DIRECTORY,
            Self::MissingManifest { .. } => codes::MISSING_MANIFEST,
            Self::OrphanDirectory { .. } => codes::ORPHAN_DIRECTORY,
            Self::NamingMismatch { .. } => codes::NAMING_MISMATCH,
        }
    }

    /// Service the issue is about; orphans are named after their directory.
    pub fn subject(&self) -> &str {
        match self {
            Self::MissingDirectory { service }
            | Self::MissingManifest { service }
            | Self::NamingMismatch { service, .. } => &service.name,
            Self::OrphanDirectory { path, .. } => path.rsplit('/').next().unwrap_or(path),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::MissingDirectory { service } | Self::MissingManifest { service } => {
                &service.declared_path
            }
            Self::NamingMismatch {
                service, manifest, ..
            } => manifest.as_deref().unwrap_or(&service.declared_path),
            Self::OrphanDirectory { path, .. } => path,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::MissingDirectory { service } => format!(
                "declared directory `{}` does not exist (registry row {})",
                service.declared_path, service.row
            ),
            Self::MissingManifest { service } => format!(
                "directory `{}` contains no build manifest (registry row {})",
                service.declared_path, service.row
            ),
            Self::OrphanDirectory { path, manifest } => format!(
                "directory `{path}` has build manifest `{manifest}` but no registry entry"
            ),
            Self::NamingMismatch {
                rule: NamingRule::ImageLabel,
                expected,
                found,
                ..
            } => format!("manifest labels image `{found}` but registry declares `{expected}`"),
            Self::NamingMismatch {
                rule: NamingRule::ImageBasename,
                expected,
                found,
                ..
            } => format!(
                "declared image name `{found}` does not end with service name `{expected}`"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralIssue {
    UnpinnedBase {
        file: String,
        line: u32,
        reference: String,
    },
    RootUser {
        file: String,
        line: Option<u32>,
        user: Option<String>,
    },
    MissingHealthcheck {
        file: String,
    },
}

impl StructuralIssue {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnpinnedBase { .. } => codes::UNPINNED_BASE,
            Self::RootUser { .. } => codes::ROOT_USER,
            Self::MissingHealthcheck { .. } => codes::MISSING_HEALTHCHECK,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Self::UnpinnedBase { file, .. }
            | Self::RootUser { file, .. }
            | Self::MissingHealthcheck { file } => file,
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self {
            Self::UnpinnedBase { line, .. } => Some(*line),
            Self::RootUser { line, .. } => *line,
            Self::MissingHealthcheck { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::UnpinnedBase { reference, .. } => {
                format!("base image `{reference}` is not version-pinned")
            }
            Self::RootUser { user: Some(user), .. } => {
                format!("final stage runs as root user `{user}`")
            }
            Self::RootUser { user: None, .. } => {
                "final stage declares no USER and runs as root".to_string()
            }
            Self::MissingHealthcheck { .. } => "final stage declares no HEALTHCHECK".to_string(),
        }
    }
}

/// A record handed over by an out-of-band lint or security scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFinding {
    pub service: String,
    pub severity: Severity,
    pub message: String,
    pub source: FindingSource,
}

// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::findings::{ComplianceFinding, Severity};
use crate::graph::{DependencyEdge, ImageNode, ImpactSet};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub total: u64,
}

impl FindingCounts {
    pub fn from_findings(findings: &[ComplianceFinding]) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_version: u32,
    pub command: String,
    pub registry: String,
    pub services: u64,
    pub manifests: u64,
    pub counts: FindingCounts,
    pub findings: Vec<ComplianceFinding>,
    pub findings_sha256: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedManifest {
    pub path: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphReport {
    pub schema_version: u32,
    pub nodes: Vec<ImageNode>,
    pub edges: Vec<DependencyEdge>,
    pub topological_order: Vec<String>,
    pub skipped: Vec<SkippedManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub schema_version: u32,
    #[serde(flatten)]
    pub impact: ImpactSet,
}

pub fn report_json_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "stackaudit validation report",
        "type": "object",
        "required": ["schema_version", "command", "registry", "services", "manifests", "counts", "findings", "findings_sha256", "exit_code"],
        "properties": {
            "schema_version": {"const": REPORT_SCHEMA_VERSION},
            "command": {"type": "string"},
            "registry": {"type": "string"},
            "services": {"type": "integer", "minimum": 0},
            "manifests": {"type": "integer", "minimum": 0},
            "counts": {
                "type": "object",
                "required": ["critical", "high", "medium", "low", "total"]
            },
            "findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["service", "severity", "source", "code", "message", "path", "line"],
                    "properties": {
                        "severity": {"enum": ["CRITICAL", "HIGH", "MEDIUM", "LOW"]},
                        "source": {"enum": ["registry", "manifest", "drift", "external-lint", "external-security"]}
                    }
                }
            },
            "findings_sha256": {"type": "string", "pattern": "^[0-9a-f]{64}$"},
            "exit_code": {"enum": [0, 1]}
        }
    })
}

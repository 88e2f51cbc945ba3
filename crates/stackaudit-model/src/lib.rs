// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

mod findings;
mod graph;
mod image_ref;
mod manifest;
mod report;
mod service;

pub use findings::{
    codes, ComplianceFinding, DriftIssue, ExternalFinding, FindingSource, NamingRule, Severity,
    StructuralIssue,
};
pub use graph::{
    DependencyEdge, DependencyKind, ImageNode, ImpactResolution, ImpactSet, ImpactedService,
    NodeKind,
};
pub use image_ref::ImageRef;
pub use manifest::{
    CopyFromRef, Directive, Manifest, ManifestError, ManifestStage, SourceRef, StageInstructions,
};
pub use report::{
    report_json_schema, FindingCounts, GraphReport, ImpactReport, SkippedManifest,
    ValidationReport, REPORT_SCHEMA_VERSION,
};
pub use service::{is_lower_kebab, MalformedRegistryEntry, ServiceRecord, Tier};

// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use stackaudit_model::{
    FindingSource, GraphReport, ImpactReport, Manifest, ManifestError, SkippedManifest,
    StructuralIssue, ValidationReport, REPORT_SCHEMA_VERSION,
};
use stackaudit_policies::AuditPolicy;
use tracing::{info, warn};

pub mod compliance;
pub mod drift;
pub mod error;
pub mod external;
pub mod graph;
pub mod impact;
pub mod manifest;
pub mod pool;
pub mod ports;
pub mod registry;
pub mod render;
pub mod scanner;

#[cfg(test)]
mod testing;

pub use compliance::{aggregate, default_severity, FindingInputs};
pub use drift::detect_drift;
pub use error::AuditError;
pub use external::{
    load_external_file, parse_external_findings, run_scan_command, ExternalFindings, ScanCommand,
};
pub use graph::{build_graph, DependencyGraph, OwnedManifest};
pub use impact::analyze_impact;
pub use manifest::{parse_manifest, structural_issues};
pub use ports::{AdapterError, AdapterSet, CommandCapture, Fs, ProcessRunner, Walk};
pub use registry::{load_registry, RegistryLoad};
pub use scanner::{scan_repository, ScanResult};

#[derive(Debug, Clone)]
pub struct AuditRequest {
    pub repo_root: PathBuf,
    pub policy: AuditPolicy,
    /// Registry document, relative to `repo_root`.
    pub registry: String,
    pub workers: usize,
}

impl AuditRequest {
    pub fn new(repo_root: PathBuf, policy: AuditPolicy) -> Self {
        Self {
            registry: policy.registry.clone(),
            workers: policy.workers,
            repo_root,
            policy,
        }
    }
}

/// Out-of-band scanner results to merge into a validation run.
#[derive(Debug, Clone, Default)]
pub struct ExternalInputs {
    pub files: Vec<(PathBuf, FindingSource)>,
    pub command: Option<ScanCommand>,
}

/// Registry, scan and parse results shared by every command.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub registry_path: String,
    pub registry: RegistryLoad,
    pub scan: ScanResult,
    /// Cleanly parsed manifests keyed by owning service.
    pub parsed: BTreeMap<String, Manifest>,
    pub manifest_errors: Vec<(String, ManifestError)>,
}

impl Workspace {
    pub fn owned_manifests(&self) -> Vec<OwnedManifest<'_>> {
        self.registry
            .records
            .iter()
            .filter_map(|service| {
                self.parsed
                    .get(&service.name)
                    .map(|manifest| OwnedManifest { service, manifest })
            })
            .collect()
    }

    pub fn graph(&self) -> Result<DependencyGraph, AuditError> {
        build_graph(&self.registry.records, &self.owned_manifests())
    }

    /// Manifests left out of the graph because they failed to parse.
    pub fn skipped(&self) -> Vec<SkippedManifest> {
        let mut by_path = BTreeMap::<String, Vec<String>>::new();
        for (_, error) in &self.manifest_errors {
            by_path
                .entry(error.file().to_string())
                .or_default()
                .push(error.to_string());
        }
        by_path
            .into_iter()
            .map(|(path, errors)| SkippedManifest { path, errors })
            .collect()
    }

    pub fn structural_issues<S: AsRef<str>>(
        &self,
        floating_tags: &[S],
    ) -> Vec<(String, StructuralIssue)> {
        self.parsed
            .iter()
            .flat_map(|(service, manifest)| {
                structural_issues(manifest, floating_tags)
                    .into_iter()
                    .map(move |issue| (service.clone(), issue))
            })
            .collect()
    }
}

pub fn load_workspace(
    adapters: AdapterSet<'_>,
    request: &AuditRequest,
) -> Result<Workspace, AuditError> {
    let root = request.repo_root.as_path();
    let registry = load_registry(adapters.fs, root, &request.registry, &request.policy)?;
    info!(
        registry = %request.registry,
        services = registry.records.len(),
        malformed = registry.errors.len(),
        "registry loaded"
    );
    for entry in &registry.errors {
        warn!(row = entry.row, reason = %entry.reason, "malformed registry entry");
    }

    let scan = scan_repository(
        adapters.fs,
        adapters.walk,
        root,
        &registry.records,
        &request.policy,
        request.workers,
    )?;
    info!(
        manifests = scan.manifests.len(),
        orphans = scan.orphans.len(),
        unreadable = scan.unreadable.len(),
        "repository scanned"
    );

    let sources = scan
        .manifests
        .iter()
        .map(|(service, source)| (service.clone(), source.path.clone(), source.text.clone()))
        .collect::<Vec<_>>();
    let results = pool::map_bounded(sources, request.workers, |(service, path, text)| {
        (service, parse_manifest(&path, &text))
    });
    let mut parsed = BTreeMap::new();
    let mut manifest_errors = scan
        .unreadable
        .iter()
        .map(|(service, error)| (service.clone(), error.clone()))
        .collect::<Vec<_>>();
    for (service, result) in results {
        match result {
            Ok(manifest) => {
                parsed.insert(service, manifest);
            }
            Err(errors) => {
                for error in errors {
                    warn!(service = %service, error = %error, "manifest skipped");
                    manifest_errors.push((service.clone(), error));
                }
            }
        }
    }
    info!(
        parsed = parsed.len(),
        errors = manifest_errors.len(),
        "manifests parsed"
    );

    Ok(Workspace {
        registry_path: request.registry.clone(),
        registry,
        scan,
        parsed,
        manifest_errors,
    })
}

pub fn collect_external(
    adapters: AdapterSet<'_>,
    request: &AuditRequest,
    inputs: &ExternalInputs,
) -> Result<ExternalFindings, AuditError> {
    let root = request.repo_root.as_path();
    let mut out = ExternalFindings::default();
    for (path, source) in &inputs.files {
        out.extend(load_external_file(adapters.fs, root, path, *source)?);
    }
    if let Some(command) = &inputs.command {
        out.extend(run_scan_command(adapters.process, root, command)?);
    }
    if !inputs.files.is_empty() || inputs.command.is_some() {
        info!(
            findings = out.findings.len(),
            invalid = out.invalid.len(),
            "external findings collected"
        );
    }
    Ok(out)
}

pub fn run_validate(
    adapters: AdapterSet<'_>,
    request: &AuditRequest,
    inputs: &ExternalInputs,
) -> Result<ValidationReport, AuditError> {
    let workspace = load_workspace(adapters, request)?;
    let graph = workspace.graph()?;
    info!(
        nodes = graph.nodes().count(),
        edges = graph.edges().count(),
        "dependency graph built"
    );
    let drift = detect_drift(
        &workspace.registry.records,
        &workspace.scan,
        &workspace.parsed,
        &request.policy,
    );
    let structural = workspace.structural_issues(&request.policy.floating_tags);
    let external = collect_external(adapters, request, inputs)?;

    let findings = aggregate(
        &FindingInputs {
            registry_path: &workspace.registry_path,
            registry_errors: &workspace.registry.errors,
            manifest_errors: &workspace.manifest_errors,
            drift: &drift,
            structural: &structural,
            external: Some(&external),
        },
        &request.policy.severity,
    );
    info!(findings = findings.len(), "findings aggregated");

    let manifests = workspace.scan.manifests.len()
        + workspace.scan.unreadable.len()
        + workspace.scan.orphans.len();
    render::build_validation_report(
        &workspace.registry_path,
        workspace.registry.records.len(),
        manifests,
        findings,
    )
    .map_err(|detail| AuditError::Render { detail })
}

pub fn run_graph(adapters: AdapterSet<'_>, request: &AuditRequest) -> Result<GraphReport, AuditError> {
    let workspace = load_workspace(adapters, request)?;
    let graph = workspace.graph()?;
    Ok(graph.report(workspace.skipped()))
}

pub fn run_impact(
    adapters: AdapterSet<'_>,
    request: &AuditRequest,
    changed: &str,
) -> Result<ImpactReport, AuditError> {
    let workspace = load_workspace(adapters, request)?;
    let graph = workspace.graph()?;
    let impact = analyze_impact(&graph, &workspace.registry.records, changed);
    info!(
        changed,
        services = impact.services.len(),
        "impact analyzed"
    );
    Ok(ImpactReport {
        schema_version: REPORT_SCHEMA_VERSION,
        impact,
    })
}

#[cfg(test)]
mod lib_tests;

// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use sha2::{Digest, Sha256};
use stackaudit_model::{
    ComplianceFinding, DependencyKind, FindingCounts, GraphReport, ImpactReport, NodeKind,
    ValidationReport, REPORT_SCHEMA_VERSION,
};

/// Hex sha256 over the compact JSON encoding of the sorted findings.
pub fn findings_digest(findings: &[ComplianceFinding]) -> Result<String, String> {
    let bytes = serde_json::to_vec(findings).map_err(|err| err.to_string())?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

pub fn exit_code_for_findings(findings: &[ComplianceFinding]) -> i32 {
    if findings.iter().any(|f| f.severity.is_actionable()) {
        1
    } else {
        0
    }
}

pub fn build_validation_report(
    registry: &str,
    services: usize,
    manifests: usize,
    findings: Vec<ComplianceFinding>,
) -> Result<ValidationReport, String> {
    Ok(ValidationReport {
        schema_version: REPORT_SCHEMA_VERSION,
        command: "validate".to_string(),
        registry: registry.to_string(),
        services: services as u64,
        manifests: manifests as u64,
        counts: FindingCounts::from_findings(&findings),
        findings_sha256: findings_digest(&findings)?,
        exit_code: exit_code_for_findings(&findings),
        findings,
    })
}

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|err| err.to_string())
}

pub fn render_text_summary(report: &ValidationReport) -> String {
    format!(
        "summary: services={} manifests={} critical={} high={} medium={} low={} total={}",
        report.services,
        report.manifests,
        report.counts.critical,
        report.counts.high,
        report.counts.medium,
        report.counts.low,
        report.counts.total,
    )
}

fn location(finding: &ComplianceFinding) -> String {
    match (&finding.path, finding.line) {
        (Some(path), Some(line)) => format!(" ({path}:{line})"),
        (Some(path), None) => format!(" ({path})"),
        _ => String::new(),
    }
}

pub fn render_validation_text(report: &ValidationReport) -> String {
    let mut lines = vec![render_text_summary(report)];
    for finding in &report.findings {
        lines.push(format!(
            "{} {} {} [{}] {}{}",
            finding.severity,
            finding.service,
            finding.code,
            finding.source,
            finding.message,
            location(finding),
        ));
    }
    lines.join("\n")
}

fn via_label(via: DependencyKind) -> &'static str {
    match via {
        DependencyKind::From => "from",
        DependencyKind::Copy => "copy",
        DependencyKind::Mount => "mount",
    }
}

pub fn render_graph_text(report: &GraphReport) -> String {
    let mut lines = vec![format!(
        "graph: nodes={} edges={} skipped={}",
        report.nodes.len(),
        report.edges.len(),
        report.skipped.len()
    )];
    for id in &report.topological_order {
        let kind = report
            .nodes
            .iter()
            .find(|node| &node.id == id)
            .map(|node| match node.kind {
                NodeKind::ExternalBase => "external",
                NodeKind::Stage { .. } => "stage",
                NodeKind::Service { .. } => "service",
            })
            .unwrap_or("unknown");
        lines.push(format!("node: {kind} {id}"));
    }
    for edge in &report.edges {
        lines.push(format!("edge: {} -> {} ({})", edge.from, edge.to, via_label(edge.via)));
    }
    for skipped in &report.skipped {
        for error in &skipped.errors {
            lines.push(format!("skipped: {} {error}", skipped.path));
        }
    }
    lines.join("\n")
}

fn dot_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn render_graph_dot(report: &GraphReport) -> String {
    let mut lines = vec!["digraph stackaudit {".to_string(), "  rankdir=LR;".to_string()];
    for node in &report.nodes {
        let shape = match node.kind {
            NodeKind::ExternalBase => "ellipse",
            NodeKind::Stage { .. } => "box",
            NodeKind::Service { .. } => "doubleoctagon",
        };
        lines.push(format!("  \"{}\" [shape={shape}];", dot_escape(&node.id)));
    }
    for edge in &report.edges {
        let style = match edge.via {
            DependencyKind::From => "solid",
            DependencyKind::Copy => "dashed",
            DependencyKind::Mount => "dotted",
        };
        lines.push(format!(
            "  \"{}\" -> \"{}\" [style={style}];",
            dot_escape(&edge.from),
            dot_escape(&edge.to)
        ));
    }
    lines.push("}".to_string());
    lines.join("\n")
}

pub fn render_impact_text(report: &ImpactReport) -> String {
    let impact = &report.impact;
    let resolution = serde_json::to_value(impact.resolution)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    let mut lines = vec![format!(
        "impact: changed={} resolution={resolution} services={}",
        impact.changed,
        impact.services.len()
    )];
    for service in &impact.services {
        lines.push(format!(
            "service: {} {} distance={}",
            service.name, service.image, service.distance
        ));
    }
    lines.join("\n")
}

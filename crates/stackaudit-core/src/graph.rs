// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};

use stackaudit_model::{
    DependencyEdge, DependencyKind, GraphReport, ImageNode, ImageRef, Manifest, NodeKind,
    ServiceRecord, SkippedManifest, SourceRef, REPORT_SCHEMA_VERSION,
};
use tracing::warn;

use crate::error::AuditError;

/// A parsed manifest together with the service that owns it.
#[derive(Debug, Clone, Copy)]
pub struct OwnedManifest<'a> {
    pub service: &'a ServiceRecord,
    pub manifest: &'a Manifest,
}

/// Image dependency DAG. Edges point from a base to what is built on it.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, ImageNode>,
    edges: BTreeSet<DependencyEdge>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    service_keys: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

pub fn stage_node_id(manifest_path: &str, local_name: &str) -> String {
    format!("{manifest_path}#{local_name}")
}

impl DependencyGraph {
    fn add_node(&mut self, id: &str, kind: NodeKind) {
        self.nodes
            .entry(id.to_string())
            .or_insert_with(|| ImageNode {
                id: id.to_string(),
                kind,
            });
    }

    fn add_edge(&mut self, from: &str, to: &str, via: DependencyKind) {
        self.edges.insert(DependencyEdge {
            from: from.to_string(),
            to: to.to_string(),
            via,
        });
        self.dependents
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    /// Service image built from `reference`: the exact declared image, or the
    /// only service publishing that repository.
    fn service_for(&self, reference: &ImageRef) -> Option<String> {
        let owners = self.service_keys.get(&reference.repository_key())?;
        owners
            .iter()
            .find(|id| ImageRef::parse(id).is_ok_and(|image| image == *reference))
            .or_else(|| if owners.len() == 1 { owners.first() } else { None })
            .cloned()
    }

    /// Node id for a reference that leaves the current file.
    fn external_node(&mut self, source: &SourceRef) -> Option<String> {
        let id = match source {
            SourceRef::External { reference } => {
                if let Some(service) = self.service_for(reference) {
                    return Some(service);
                }
                reference.to_string()
            }
            SourceRef::Unresolved { expression } => expression.clone(),
            SourceRef::Stage { .. } | SourceRef::Scratch => return None,
        };
        self.add_node(&id, NodeKind::ExternalBase);
        Some(id)
    }

    fn add_manifest(&mut self, owned: OwnedManifest<'_>) {
        let manifest = owned.manifest;
        let last = manifest.stages.len().saturating_sub(1);
        let stage_ids = manifest
            .stages
            .iter()
            .map(|stage| {
                if stage.index == last {
                    owned.service.declared_image.clone()
                } else {
                    stage_node_id(&manifest.path, &stage.local_name())
                }
            })
            .collect::<Vec<_>>();

        for stage in &manifest.stages {
            let target = stage_ids[stage.index].clone();
            if stage.index != last {
                self.add_node(
                    &target,
                    NodeKind::Stage {
                        manifest: manifest.path.clone(),
                        index: stage.index,
                        alias: stage.alias.clone(),
                    },
                );
            }
            let sources = std::iter::once((&stage.base, DependencyKind::From)).chain(
                stage
                    .instructions
                    .copy_from_refs
                    .iter()
                    .map(|copy| (&copy.source, copy.via)),
            );
            for (source, via) in sources {
                let from = match source {
                    SourceRef::Stage { index, .. } => stage_ids.get(*index).cloned(),
                    other => self.external_node(other),
                };
                if let Some(from) = from {
                    self.add_edge(&from, &target, via);
                }
            }
        }
    }

    /// Kahn's algorithm with a sorted ready set, so the order is stable.
    fn sort(&mut self) -> Result<(), AuditError> {
        let mut indegree = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), 0usize))
            .collect::<BTreeMap<_, _>>();
        for edge in &self.edges {
            if let Some(count) = indegree.get_mut(edge.to.as_str()) {
                *count += 1;
            }
        }
        let mut ready = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect::<BTreeSet<_>>();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in self.dependents.get(id).into_iter().flatten() {
                if let Some(count) = indegree.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
        if order.len() < self.nodes.len() {
            let placed = order.iter().map(String::as_str).collect::<BTreeSet<_>>();
            let nodes = self
                .nodes
                .keys()
                .filter(|id| !placed.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(AuditError::CyclicDependency { nodes });
        }
        self.order = order;
        Ok(())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ImageNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn node(&self, id: &str) -> Option<&ImageNode> {
        self.nodes.get(id)
    }

    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Service and external nodes whose image shares `key` as repository key.
    pub fn nodes_for_key(&self, key: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|node| {
                matches!(node.kind, NodeKind::Service { .. } | NodeKind::ExternalBase)
            })
            .filter(|node| {
                ImageRef::parse(&node.id).is_ok_and(|image| image.repository_key() == key)
            })
            .map(|node| node.id.as_str())
            .collect()
    }

    pub fn report(&self, skipped: Vec<SkippedManifest>) -> GraphReport {
        GraphReport {
            schema_version: REPORT_SCHEMA_VERSION,
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.iter().cloned().collect(),
            topological_order: self.order.clone(),
            skipped,
        }
    }
}

/// Builds the graph over every service record and the manifests they own.
/// Cross-file edges only arise through a service's declared image.
pub fn build_graph(
    records: &[ServiceRecord],
    manifests: &[OwnedManifest<'_>],
) -> Result<DependencyGraph, AuditError> {
    let mut graph = DependencyGraph::default();
    for record in records {
        if let Some(owner) = graph
            .node(&record.declared_image)
            .and_then(ImageNode::service_name)
        {
            warn!(service = %record.name, owner = %owner, image = %record.declared_image, "declared image already has a service node");
            continue;
        }
        graph.add_node(
            &record.declared_image,
            NodeKind::Service {
                service: record.name.clone(),
            },
        );
        match ImageRef::parse(&record.declared_image) {
            Ok(image) => {
                graph
                    .service_keys
                    .entry(image.repository_key())
                    .or_default()
                    .insert(record.declared_image.clone());
            }
            Err(err) => warn!(service = %record.name, error = %err, "declared image is not a valid reference"),
        }
    }

    let mut ordered = manifests.to_vec();
    ordered.sort_by(|a, b| a.manifest.path.cmp(&b.manifest.path));
    for owned in ordered {
        let owner = graph
            .node(&owned.service.declared_image)
            .and_then(ImageNode::service_name);
        if owner != Some(owned.service.name.as_str()) {
            warn!(service = %owned.service.name, manifest = %owned.manifest.path, "manifest skipped, its image belongs to another service");
            continue;
        }
        graph.add_manifest(owned);
    }
    graph.sort()?;
    Ok(graph)
}

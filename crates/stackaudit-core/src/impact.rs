// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use stackaudit_model::{ImageRef, ImpactResolution, ImpactSet, ImpactedService, ServiceRecord};

use crate::graph::DependencyGraph;
use crate::registry::normalize_rel_path;

struct Start {
    resolution: ImpactResolution,
    node: Option<String>,
    nodes: Vec<String>,
    include_self: bool,
}

fn owning_service<'a>(path: &str, records: &'a [ServiceRecord]) -> Option<&'a ServiceRecord> {
    records
        .iter()
        .filter(|r| {
            path == r.declared_path
                || path
                    .strip_prefix(r.declared_path.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|r| r.declared_path.len())
}

fn resolve(graph: &DependencyGraph, records: &[ServiceRecord], changed: &str) -> Option<Start> {
    let changed = changed.trim();
    if graph.node(changed).is_some() {
        return Some(Start {
            resolution: ImpactResolution::Node,
            node: Some(changed.to_string()),
            nodes: vec![changed.to_string()],
            include_self: false,
        });
    }
    if let Some(service) = normalize_rel_path(changed)
        .as_deref()
        .and_then(|path| owning_service(path, records))
    {
        return Some(Start {
            resolution: ImpactResolution::Path,
            node: Some(service.declared_image.clone()),
            nodes: vec![service.declared_image.clone()],
            include_self: true,
        });
    }
    let key = ImageRef::parse(changed).ok()?.repository_key();
    let nodes = graph
        .nodes_for_key(&key)
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if nodes.is_empty() {
        return None;
    }
    Some(Start {
        resolution: ImpactResolution::Repository,
        node: (nodes.len() == 1).then(|| nodes[0].clone()),
        nodes,
        include_self: false,
    })
}

/// Services that must rebuild when `changed` changes. `changed` may be a
/// graph node id, a repository path, or an image reference.
pub fn analyze_impact(
    graph: &DependencyGraph,
    records: &[ServiceRecord],
    changed: &str,
) -> ImpactSet {
    let Some(start) = resolve(graph, records, changed) else {
        return ImpactSet {
            changed: changed.to_string(),
            resolution: ImpactResolution::Unresolved,
            node: None,
            services: Vec::new(),
        };
    };

    let mut distance = BTreeMap::<String, usize>::new();
    let mut queue = VecDeque::new();
    for node in &start.nodes {
        distance.insert(node.clone(), 0);
        queue.push_back(node.clone());
    }
    while let Some(id) = queue.pop_front() {
        let next = distance.get(&id).copied().unwrap_or_default() + 1;
        for dependent in graph.dependents(&id) {
            if !distance.contains_key(dependent) {
                distance.insert(dependent.to_string(), next);
                queue.push_back(dependent.to_string());
            }
        }
    }

    let starts = start.nodes.iter().collect::<BTreeSet<_>>();
    let mut services = BTreeMap::<String, ImpactedService>::new();
    for (id, hops) in distance {
        if !start.include_self && starts.contains(&id) {
            continue;
        }
        let Some(name) = graph.node(&id).and_then(|node| node.service_name()) else {
            continue;
        };
        services
            .entry(name.to_string())
            .and_modify(|entry| entry.distance = entry.distance.min(hops))
            .or_insert_with(|| ImpactedService {
                name: name.to_string(),
                image: id.clone(),
                distance: hops,
            });
    }

    ImpactSet {
        changed: changed.to_string(),
        resolution: start.resolution,
        node: start.node,
        services: services.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graph, OwnedManifest};
    use crate::manifest::parse_manifest;
    use stackaudit_model::{Manifest, Tier};

    fn record(name: &str, image: &str) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            codename: name.to_string(),
            tier: Tier::Application,
            declared_path: format!("services/{name}"),
            declared_image: image.to_string(),
            row: 1,
        }
    }

    struct Fixture {
        records: Vec<ServiceRecord>,
        manifests: Vec<Manifest>,
    }

    impl Fixture {
        fn new() -> Self {
            let records = vec![
                record("mid", "acme/mid:2.0"),
                record("svc-a", "acme/svc-a:1.0"),
                record("svc-b", "acme/svc-b:1.0"),
                record("svc-c", "acme/svc-c:1.0"),
            ];
            let texts = [
                "FROM base:1.0\n",
                "FROM base:1.0 AS deps\nFROM deps\n",
                "FROM acme/mid:2.0\n",
                "FROM alpine:3.20\n",
            ];
            let manifests = records
                .iter()
                .zip(texts)
                .map(|(r, text)| {
                    parse_manifest(&format!("{}/Dockerfile", r.declared_path), text)
                        .expect("manifest")
                })
                .collect();
            Self { records, manifests }
        }

        fn graph(&self) -> DependencyGraph {
            let owned = self
                .records
                .iter()
                .zip(&self.manifests)
                .map(|(service, manifest)| OwnedManifest { service, manifest })
                .collect::<Vec<_>>();
            build_graph(&self.records, &owned).expect("graph")
        }
    }

    #[test]
    fn shared_base_reaches_direct_and_transitive_services() {
        let fixture = Fixture::new();
        let impact = analyze_impact(&fixture.graph(), &fixture.records, "base:1.0");
        assert_eq!(impact.resolution, ImpactResolution::Node);
        assert_eq!(impact.names(), vec!["mid", "svc-a", "svc-b"]);
        let distances = impact.services.iter().map(|s| s.distance).collect::<Vec<_>>();
        assert_eq!(distances, vec![1, 2, 2]);
    }

    #[test]
    fn path_change_includes_the_owning_service() {
        let fixture = Fixture::new();
        let impact = analyze_impact(&fixture.graph(), &fixture.records, "services/mid/src/main.rs");
        assert_eq!(impact.resolution, ImpactResolution::Path);
        assert_eq!(impact.names(), vec!["mid", "svc-b"]);
    }

    #[test]
    fn repository_key_resolves_other_tags() {
        let fixture = Fixture::new();
        let impact = analyze_impact(&fixture.graph(), &fixture.records, "acme/mid:2.1");
        assert_eq!(impact.resolution, ImpactResolution::Repository);
        assert_eq!(impact.names(), vec!["svc-b"]);
    }

    #[test]
    fn services_sharing_a_repository_keep_their_own_dependents() {
        let records = vec![
            record("svc-a", "acme/rt:1.0"),
            record("svc-b", "acme/rt:2.0"),
            record("svc-c", "acme/svc-c:1.0"),
        ];
        let texts = ["FROM base:1.0\n", "FROM other:1.0\n", "FROM acme/rt:2.0\n"];
        let manifests = records
            .iter()
            .zip(texts)
            .map(|(r, text)| {
                parse_manifest(&format!("{}/Dockerfile", r.declared_path), text).expect("manifest")
            })
            .collect::<Vec<_>>();
        let owned = records
            .iter()
            .zip(&manifests)
            .map(|(service, manifest)| OwnedManifest { service, manifest })
            .collect::<Vec<_>>();
        let graph = build_graph(&records, &owned).expect("graph");
        assert_eq!(
            analyze_impact(&graph, &records, "other:1.0").names(),
            vec!["svc-b", "svc-c"]
        );
        assert_eq!(analyze_impact(&graph, &records, "base:1.0").names(), vec!["svc-a"]);
    }

    #[test]
    fn leaves_and_unknown_references_yield_empty_sets() {
        let fixture = Fixture::new();
        let graph = fixture.graph();
        let leaf = analyze_impact(&graph, &fixture.records, "alpine:3.20");
        assert_eq!(leaf.resolution, ImpactResolution::Node);
        assert_eq!(leaf.names(), vec!["svc-c"]);

        let final_image = analyze_impact(&graph, &fixture.records, "acme/svc-c:1.0");
        assert!(final_image.services.is_empty());

        let unknown = analyze_impact(&graph, &fixture.records, "docs/README.md");
        assert_eq!(unknown.resolution, ImpactResolution::Unresolved);
        assert!(unknown.services.is_empty());
    }
}

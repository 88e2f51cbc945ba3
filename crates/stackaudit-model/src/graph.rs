// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    From,
    Copy,
    Mount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    ExternalBase,
    Stage {
        manifest: String,
        index: usize,
        alias: Option<String>,
    },
    Service {
        service: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageNode {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl ImageNode {
    pub fn service_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Service { service } => Some(service),
            _ => None,
        }
    }
}

/// `to` is built from `from`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub via: DependencyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactResolution {
    Node,
    Path,
    Repository,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactedService {
    pub name: String,
    pub image: String,
    pub distance: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactSet {
    pub changed: String,
    pub resolution: ImpactResolution,
    pub node: Option<String>,
    pub services: Vec<ImpactedService>,
}

impl ImpactSet {
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackaudit_model::{Severity, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[non_exhaustive]
pub enum PolicySchemaVersion {
    V1,
}

impl PolicySchemaVersion {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::V1 => 1,
        }
    }
}

impl TryFrom<u32> for PolicySchemaVersion {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            other => Err(format!("unsupported schema_version {other}: expected 1")),
        }
    }
}

impl From<PolicySchemaVersion> for u32 {
    fn from(value: PolicySchemaVersion) -> Self {
        value.as_u32()
    }
}

/// How the last segment of a declared path relates to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafRule {
    Any,
    Name,
    Codename,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierRule {
    pub root: String,
    #[serde(default = "default_leaf_rule")]
    pub leaf: LeafRule,
}

fn default_leaf_rule() -> LeafRule {
    LeafRule::Any
}

impl TierRule {
    fn rooted(root: &str) -> Self {
        Self {
            root: root.to_string(),
            leaf: LeafRule::Any,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierRules {
    pub core: TierRule,
    pub plugin: TierRule,
    pub application: TierRule,
}

impl Default for TierRules {
    fn default() -> Self {
        Self {
            core: TierRule::rooted("core"),
            plugin: TierRule::rooted("plugins"),
            application: TierRule::rooted("services"),
        }
    }
}

impl TierRules {
    #[must_use]
    pub fn rule(&self, tier: Tier) -> &TierRule {
        match tier {
            Tier::Core => &self.core,
            Tier::Plugin => &self.plugin,
            Tier::Application => &self.application,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingPolicy {
    pub service_pattern: String,
    pub codename_pattern: String,
    pub image_basename_matches_name: bool,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            service_pattern: "^[a-z0-9][a-z0-9-]*$".to_string(),
            codename_pattern: "^[a-z][a-z0-9-]*$".to_string(),
            image_basename_matches_name: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditPolicy {
    pub schema_version: PolicySchemaVersion,
    pub registry: String,
    pub manifest_names: Vec<String>,
    pub ignore: Vec<String>,
    pub image_label: String,
    pub floating_tags: Vec<String>,
    pub workers: usize,
    pub external_timeout_seconds: u64,
    pub naming: NamingPolicy,
    pub tiers: TierRules,
    /// Finding code to severity overrides.
    pub severity: BTreeMap<String, Severity>,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            schema_version: PolicySchemaVersion::V1,
            registry: "registry/services.toml".to_string(),
            manifest_names: vec!["Dockerfile".to_string(), "Containerfile".to_string()],
            ignore: [".git", "node_modules", "target", ".venv", "vendor", "__pycache__"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            image_label: "org.opencontainers.image.ref.name".to_string(),
            floating_tags: ["latest", "stable", "edge", "nightly", "main", "master", "lts"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            workers: 4,
            external_timeout_seconds: 120,
            naming: NamingPolicy::default(),
            tiers: TierRules::default(),
            severity: BTreeMap::new(),
        }
    }
}

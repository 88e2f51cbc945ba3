// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

pub fn is_lower_kebab(input: &str) -> bool {
    !input.is_empty()
        && !input.starts_with('-')
        && !input.ends_with('-')
        && input
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Core,
    Plugin,
    Application,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Core, Tier::Plugin, Tier::Application];

    pub fn parse(value: &str) -> Result<Self, String> {
        let raw = value.trim();
        match raw.to_ascii_lowercase().as_str() {
            "core" => Ok(Self::Core),
            "plugin" => Ok(Self::Plugin),
            "application" => Ok(Self::Application),
            _ => Err(format!(
                "invalid tier `{raw}`: expected core, plugin or application"
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Plugin => "plugin",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry row after validation. Records are never mutated once the
/// loader hands them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub codename: String,
    pub tier: Tier,
    pub declared_path: String,
    pub declared_image: String,
    pub row: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRegistryEntry {
    pub row: usize,
    pub name: Option<String>,
    pub line: Option<u32>,
    pub raw: String,
    pub reason: String,
}

impl fmt::Display for MalformedRegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry row {}: {}", self.row, self.reason)
    }
}

// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use stackaudit_policies::PolicyValidationError;

use crate::ports::AdapterError;

/// Conditions that stop a run because its result could not be trusted.
/// Per-row and per-file problems are findings, never `AuditError`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    RegistryUnreadable { path: String, detail: String },
    PolicyInvalid { detail: String },
    CyclicDependency { nodes: Vec<String> },
    ExternalToolFailure { tool: String, detail: String },
    Render { detail: String },
    Adapter(AdapterError),
}

impl AuditError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RegistryUnreadable { .. } => "REGISTRY_UNREADABLE",
            Self::PolicyInvalid { .. } => "POLICY_INVALID",
            Self::CyclicDependency { .. } => "CYCLIC_DEPENDENCY",
            Self::ExternalToolFailure { .. } => "EXTERNAL_TOOL_FAILURE",
            Self::Render { .. } => "RENDER_FAILURE",
            Self::Adapter(_) => "ADAPTER_FAILURE",
        }
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistryUnreadable { path, detail } => {
                write!(f, "registry {path} cannot be read: {detail}")
            }
            Self::PolicyInvalid { detail } => write!(f, "invalid configuration: {detail}"),
            Self::CyclicDependency { nodes } => write!(
                f,
                "dependency graph contains a cycle through: {}",
                nodes.join(", ")
            ),
            Self::ExternalToolFailure { tool, detail } => {
                write!(f, "external tool `{tool}` failed: {detail}")
            }
            Self::Render { detail } => write!(f, "report rendering failed: {detail}"),
            Self::Adapter(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Adapter(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AdapterError> for AuditError {
    fn from(value: AdapterError) -> Self {
        Self::Adapter(value)
    }
}

impl From<PolicyValidationError> for AuditError {
    fn from(value: PolicyValidationError) -> Self {
        Self::PolicyInvalid { detail: value.0 }
    }
}

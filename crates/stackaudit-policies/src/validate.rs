use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{Map, Value};
use stackaudit_model::{codes, Tier};

use crate::schema::AuditPolicy;

pub const POLICY_FILE_NAME: &str = "stackaudit.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyValidationError(pub String);

impl std::fmt::Display for PolicyValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PolicyValidationError {}

#[must_use]
pub fn policy_config_path(root: &Path) -> PathBuf {
    root.join(POLICY_FILE_NAME)
}

/// Loads `explicit` when given (it must exist), otherwise the optional
/// `stackaudit.toml` under `root`, falling back to defaults.
pub fn load_policy(root: &Path, explicit: Option<&Path>) -> Result<AuditPolicy, PolicyValidationError> {
    let path = match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => root.join(path),
        None => {
            let default_path = policy_config_path(root);
            if !default_path.exists() {
                return Ok(AuditPolicy::default());
            }
            default_path
        }
    };
    let text = fs::read_to_string(&path).map_err(|e| {
        PolicyValidationError(format!("read config {} failed: {e}", path.display()))
    })?;
    parse_policy(&text)
        .map_err(|e| PolicyValidationError(format!("{}: {}", path.display(), e.0)))
}

pub fn parse_policy(text: &str) -> Result<AuditPolicy, PolicyValidationError> {
    let policy: AuditPolicy = toml::from_str(text)
        .map_err(|e| PolicyValidationError(format!("parse config failed: {e}")))?;
    let errors = validate_policy(&policy);
    if errors.is_empty() {
        Ok(policy)
    } else {
        Err(PolicyValidationError(errors.join("; ")))
    }
}

fn root_is_relative_and_clean(root: &str) -> bool {
    !root.is_empty()
        && !root.starts_with('/')
        && root
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

pub fn validate_policy(policy: &AuditPolicy) -> Vec<String> {
    let mut errors = Vec::new();

    if policy.registry.trim().is_empty() {
        errors.push("registry must not be empty".to_string());
    }
    if policy.manifest_names.is_empty() {
        errors.push("manifest_names must list at least one file name".to_string());
    }
    for name in &policy.manifest_names {
        if name.trim().is_empty() || name.contains('/') {
            errors.push(format!("manifest name `{name}` must be a bare file name"));
        }
    }
    if policy.workers == 0 || policy.workers > 64 {
        errors.push(format!("workers must be within 1..=64, got {}", policy.workers));
    }
    if policy.external_timeout_seconds == 0 {
        errors.push("external_timeout_seconds must be > 0".to_string());
    }
    if policy.image_label.trim().is_empty() {
        errors.push("image_label must not be empty".to_string());
    }

    for (field, pattern) in [
        ("naming.service_pattern", &policy.naming.service_pattern),
        ("naming.codename_pattern", &policy.naming.codename_pattern),
    ] {
        if let Err(err) = Regex::new(pattern) {
            errors.push(format!("{field} does not compile: {err}"));
        }
    }

    let mut roots = BTreeSet::new();
    for tier in Tier::ALL {
        let root = policy.tiers.rule(tier).root.trim_end_matches('/');
        if !root_is_relative_and_clean(root) {
            errors.push(format!(
                "tiers.{tier}.root `{root}` must be a clean relative path"
            ));
        }
        if !roots.insert(root.to_string()) {
            errors.push(format!("tiers.{tier}.root `{root}` is shared with another tier"));
        }
    }
    let roots = roots.into_iter().collect::<Vec<_>>();
    for outer in &roots {
        for inner in &roots {
            if outer != inner && inner.starts_with(&format!("{outer}/")) {
                errors.push(format!("tier root `{inner}` is nested inside `{outer}`"));
            }
        }
    }

    for code in policy.severity.keys() {
        if !codes::ALL.contains(&code.as_str()) {
            errors.push(format!("severity override for unknown finding code `{code}`"));
        }
    }

    errors
}

pub fn canonical_policy_json(policy: &AuditPolicy) -> Result<String, PolicyValidationError> {
    let value = serde_json::to_value(policy)
        .map_err(|e| PolicyValidationError(format!("encode config failed: {e}")))?;
    let normalized = normalize_json(value);
    serde_json::to_string_pretty(&normalized)
        .map_err(|e| PolicyValidationError(format!("print config failed: {e}")))
}

fn normalize_json(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .map(|(k, v)| (k, normalize_json(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_json).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LeafRule;
    use stackaudit_model::Severity;

    #[test]
    fn empty_document_yields_defaults() {
        let policy = parse_policy("").expect("defaults");
        assert_eq!(policy, AuditPolicy::default());
        assert_eq!(policy.tiers.rule(Tier::Application).root, "services");
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let policy = parse_policy(
            r#"
schema_version = 1
workers = 2

[tiers.plugin]
root = "extensions"
leaf = "codename"

[severity]
DRIFT_ORPHAN_DIRECTORY = "LOW"
"#,
        )
        .expect("policy");
        assert_eq!(policy.workers, 2);
        assert_eq!(policy.tiers.plugin.root, "extensions");
        assert_eq!(policy.tiers.plugin.leaf, LeafRule::Codename);
        assert_eq!(policy.tiers.core.root, "core");
        assert_eq!(
            policy.severity.get(codes::ORPHAN_DIRECTORY),
            Some(&Severity::Low)
        );
    }

    #[test]
    fn rejects_unknown_fields_and_versions() {
        assert!(parse_policy("unknown = true").is_err());
        assert!(parse_policy("schema_version = 2").is_err());
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut policy = AuditPolicy::default();
        policy.workers = 0;
        policy.manifest_names = vec!["docker/Dockerfile".to_string()];
        policy.tiers.plugin.root = "services/plugins".to_string();
        policy.naming.codename_pattern = "([".to_string();
        policy
            .severity
            .insert("NOT_A_CODE".to_string(), Severity::High);
        let errors = validate_policy(&policy);
        assert_eq!(errors.len(), 5, "{errors:?}");
    }

    #[test]
    fn canonical_json_is_sorted() {
        let text = canonical_policy_json(&AuditPolicy::default()).expect("json");
        let external = text.find("\"external_timeout_seconds\"").expect("key");
        let workers = text.find("\"workers\"").expect("key");
        assert!(external < workers);
    }
}

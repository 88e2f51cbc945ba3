// SPDX-License-Identifier: Apache-2.0

//! Service registry loading. Rows are evaluated independently: a bad row
//! becomes a `MalformedRegistryEntry` and never hides the rows after it.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use stackaudit_model::{ImageRef, MalformedRegistryEntry, ServiceRecord, Tier};
use stackaudit_policies::{AuditPolicy, LeafRule, TierRules};

use crate::error::AuditError;
use crate::ports::Fs;

const REQUIRED_FIELDS: [&str; 4] = ["name", "tier", "path", "image"];
const KNOWN_FIELDS: [&str; 5] = ["name", "codename", "tier", "path", "image"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryLoad {
    pub records: Vec<ServiceRecord>,
    pub errors: Vec<MalformedRegistryEntry>,
}

#[derive(Debug)]
struct RawRow {
    row: usize,
    line: Option<u32>,
    raw: String,
    fields: Result<BTreeMap<String, String>, String>,
}

struct NamingRules {
    service: Regex,
    codename: Regex,
}

impl NamingRules {
    fn compile(policy: &AuditPolicy) -> Result<Self, AuditError> {
        let compile = |field: &str, pattern: &str| {
            Regex::new(pattern).map_err(|err| AuditError::PolicyInvalid {
                detail: format!("naming.{field} `{pattern}` does not compile: {err}"),
            })
        };
        Ok(Self {
            service: compile("service_pattern", &policy.naming.service_pattern)?,
            codename: compile("codename_pattern", &policy.naming.codename_pattern)?,
        })
    }
}

pub fn load_registry(
    fs: &dyn Fs,
    repo_root: &Path,
    registry: &str,
    policy: &AuditPolicy,
) -> Result<RegistryLoad, AuditError> {
    let text = fs
        .read_text(repo_root, Path::new(registry))
        .map_err(|err| AuditError::RegistryUnreadable {
            path: registry.to_string(),
            detail: err.to_string(),
        })?;
    parse_registry_document(registry, &text, policy)
}

/// Parses a registry document. `.md` files are read as a pipe table, every
/// other extension as TOML.
pub fn parse_registry_document(
    path: &str,
    text: &str,
    policy: &AuditPolicy,
) -> Result<RegistryLoad, AuditError> {
    let rules = NamingRules::compile(policy)?;
    let rows = if path.ends_with(".md") {
        markdown_rows(text).ok_or_else(|| AuditError::RegistryUnreadable {
            path: path.to_string(),
            detail: format!(
                "no markdown table with columns {}",
                REQUIRED_FIELDS.join(", ")
            ),
        })?
    } else {
        toml_rows(text).map_err(|detail| AuditError::RegistryUnreadable {
            path: path.to_string(),
            detail,
        })?
    };

    let mut load = RegistryLoad::default();
    let mut names = BTreeMap::<String, usize>::new();
    let mut paths = BTreeMap::<String, String>::new();
    let mut images = BTreeMap::<String, String>::new();
    for row in rows {
        let record = row
            .fields
            .clone()
            .and_then(|fields| validate_row(row.row, &fields, &rules, &policy.tiers));
        let record = record.and_then(|record| {
            if let Some(first) = names.get(&record.name) {
                return Err(format!(
                    "duplicate service name `{}` (first declared on row {first})",
                    record.name
                ));
            }
            if let Some(owner) = paths.get(&record.declared_path) {
                return Err(format!(
                    "declared path `{}` is already owned by `{owner}`",
                    record.declared_path
                ));
            }
            if let Some(owner) = images.get(&record.declared_image) {
                return Err(format!(
                    "declared image `{}` is already built by `{owner}`",
                    record.declared_image
                ));
            }
            Ok(record)
        });
        match record {
            Ok(record) => {
                names.insert(record.name.clone(), record.row);
                paths.insert(record.declared_path.clone(), record.name.clone());
                images.insert(record.declared_image.clone(), record.name.clone());
                load.records.push(record);
            }
            Err(reason) => load.errors.push(MalformedRegistryEntry {
                row: row.row,
                name: row
                    .fields
                    .as_ref()
                    .ok()
                    .and_then(|f| f.get("name"))
                    .filter(|n| !n.is_empty())
                    .cloned(),
                line: row.line,
                raw: row.raw,
                reason,
            }),
        }
    }
    Ok(load)
}

fn validate_row(
    row: usize,
    fields: &BTreeMap<String, String>,
    rules: &NamingRules,
    tiers: &TierRules,
) -> Result<ServiceRecord, String> {
    for field in REQUIRED_FIELDS {
        if fields.get(field).is_none_or(|v| v.is_empty()) {
            return Err(format!("missing required field `{field}`"));
        }
    }
    let get = |field: &str| fields.get(field).map(String::as_str).unwrap_or_default();
    let name = get("name");
    if !rules.service.is_match(name) {
        return Err(format!(
            "service name `{name}` does not match `{}`",
            rules.service.as_str()
        ));
    }
    let tier = Tier::parse(get("tier"))?;
    let codename = match get("codename") {
        "" => name,
        codename => codename,
    };
    if !rules.codename.is_match(codename) {
        return Err(format!(
            "codename `{codename}` does not match `{}`",
            rules.codename.as_str()
        ));
    }
    let image = ImageRef::parse(get("image"))?;
    let declared_path = check_declared_path(get("path"), tier, name, codename, tiers)?;
    Ok(ServiceRecord {
        name: name.to_string(),
        codename: codename.to_string(),
        tier,
        declared_path,
        declared_image: image.to_string(),
        row,
    })
}

/// Clean repository-relative form of `raw`: no leading `./`, no trailing
/// `/`, no empty, `.` or `..` segments, not absolute.
pub fn normalize_rel_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return None;
    }
    let clean = trimmed
        .split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    clean.then(|| trimmed.to_string())
}

/// Maps a declared path onto the tier's path grammar: it must sit under the
/// tier root and its last segment must satisfy the tier's leaf rule.
pub fn check_declared_path(
    raw: &str,
    tier: Tier,
    name: &str,
    codename: &str,
    tiers: &TierRules,
) -> Result<String, String> {
    let path = normalize_rel_path(raw)
        .ok_or_else(|| format!("path `{raw}` is not a clean repository-relative path"))?;
    let rule = tiers.rule(tier);
    let root = rule.root.trim_matches('/');
    let under_root = path
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty());
    if !under_root {
        return Err(format!(
            "path `{path}` is not under `{root}/` required for {tier} services"
        ));
    }
    let leaf = path.rsplit('/').next().unwrap_or(&path);
    match rule.leaf {
        LeafRule::Any => Ok(path),
        LeafRule::Name if leaf == name => Ok(path),
        LeafRule::Codename if leaf == codename => Ok(path),
        LeafRule::Name => Err(format!("path `{path}` must end with service name `{name}`")),
        LeafRule::Codename => Err(format!("path `{path}` must end with codename `{codename}`")),
    }
}

fn services_header_lines(text: &str) -> Vec<u32> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            line.split('#').next().unwrap_or("").trim().replace(' ', "") == "[[services]]"
        })
        .map(|(idx, _)| u32::try_from(idx + 1).unwrap_or(u32::MAX))
        .collect()
}

fn toml_rows(text: &str) -> Result<Vec<RawRow>, String> {
    let doc = text
        .parse::<toml::Table>()
        .map_err(|err| format!("invalid toml: {err}"))?;
    match doc.get("schema_version").and_then(toml::Value::as_integer) {
        Some(1) => {}
        Some(other) => return Err(format!("unsupported schema_version {other}: expected 1")),
        None => return Err("missing integer schema_version".to_string()),
    }
    if let Some(key) = doc
        .keys()
        .find(|key| !matches!(key.as_str(), "schema_version" | "services"))
    {
        return Err(format!("unknown top-level key `{key}`"));
    }
    let services = match doc.get("services") {
        None => return Ok(Vec::new()),
        Some(toml::Value::Array(items)) => items,
        Some(_) => return Err("`services` must be an array of tables".to_string()),
    };
    let header_lines = services_header_lines(text);
    let rows = services
        .iter()
        .enumerate()
        .map(|(idx, item)| RawRow {
            row: idx + 1,
            line: header_lines.get(idx).copied(),
            raw: item.to_string(),
            fields: toml_fields(item),
        })
        .collect();
    Ok(rows)
}

fn toml_fields(item: &toml::Value) -> Result<BTreeMap<String, String>, String> {
    let table = item
        .as_table()
        .ok_or_else(|| "service entry is not a table".to_string())?;
    let mut fields = BTreeMap::new();
    for (key, value) in table {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            return Err(format!("unknown field `{key}`"));
        }
        let text = value
            .as_str()
            .ok_or_else(|| format!("field `{key}` must be a string"))?;
        fields.insert(key.clone(), text.trim().to_string());
    }
    Ok(fields)
}

fn table_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner
        .split('|')
        .map(|cell| cell.replace('`', "").trim().to_string())
        .collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    cells.iter().all(|cell| {
        !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':' | ' '))
    })
}

/// Rows of the first pipe table whose header names every required column.
fn markdown_rows(text: &str) -> Option<Vec<RawRow>> {
    let lines = text.lines().collect::<Vec<_>>();
    let mut idx = 0usize;
    while idx < lines.len() {
        if !lines[idx].trim_start().starts_with('|') {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx < lines.len() && lines[idx].trim_start().starts_with('|') {
            idx += 1;
        }
        let block = &lines[start..idx];
        let header = table_cells(block[0])
            .into_iter()
            .map(|cell| cell.to_ascii_lowercase())
            .collect::<Vec<_>>();
        let qualifies = REQUIRED_FIELDS
            .iter()
            .all(|field| header.iter().any(|h| h == field));
        if !qualifies || block.len() < 2 || !is_separator_row(&table_cells(block[1])) {
            continue;
        }
        let mut rows = Vec::new();
        for (offset, line) in block.iter().enumerate().skip(2) {
            let cells = table_cells(line);
            if cells.iter().all(String::is_empty) {
                continue;
            }
            let fields = if cells.len() == header.len() {
                let mut fields = BTreeMap::new();
                for (column, cell) in header.iter().zip(cells) {
                    if KNOWN_FIELDS.contains(&column.as_str()) {
                        fields.insert(column.clone(), cell);
                    }
                }
                Ok(fields)
            } else {
                Err(format!(
                    "expected {} cells, found {}",
                    header.len(),
                    cells.len()
                ))
            };
            rows.push(RawRow {
                row: rows.len() + 1,
                line: u32::try_from(start + offset + 1).ok(),
                raw: line.trim().to_string(),
                fields,
            });
        }
        return Some(rows);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AuditPolicy {
        AuditPolicy::default()
    }

    const TOML_REGISTRY: &str = r#"
schema_version = 1

[[services]]
name = "svc-a"
tier = "application"
path = "services/svc-a"
image = "acme/svc-a:1.0"

[[services]]
name = "base"
codename = "foundation"
tier = "core"
path = "./core/base/"
image = "acme/base:1.0"
"#;

    #[test]
    fn loads_toml_rows_into_records() {
        let load = parse_registry_document("registry/services.toml", TOML_REGISTRY, &policy())
            .expect("registry loads");
        assert!(load.errors.is_empty(), "{:?}", load.errors);
        assert_eq!(load.records.len(), 2);
        let base = &load.records[1];
        assert_eq!(base.codename, "foundation");
        assert_eq!(base.declared_path, "core/base");
        assert_eq!(base.tier, Tier::Core);
        assert_eq!(base.row, 2);
        assert_eq!(load.records[0].codename, "svc-a");
    }

    #[test]
    fn malformed_rows_do_not_hide_later_rows() {
        let text = r#"
schema_version = 1

[[services]]
name = "svc-a"
tier = "galaxy"
path = "services/svc-a"
image = "acme/svc-a:1.0"

[[services]]
name = "svc-b"
tier = "application"
path = "services/svc-b"

[[services]]
name = "svc-c"
tier = "application"
path = "plugins/svc-c"
image = "acme/svc-c:1.0"

[[services]]
name = "svc-d"
tier = "application"
path = "services/svc-d"
image = "acme/svc-d:1.0"

[[services]]
name = "svc-d"
tier = "application"
path = "services/svc-d2"
image = "acme/svc-d2:1.0"
"#;
        let load = parse_registry_document("services.toml", text, &policy()).expect("loads");
        assert_eq!(load.records.len(), 1);
        assert_eq!(load.records[0].name, "svc-d");
        let rows = load.errors.iter().map(|e| e.row).collect::<Vec<_>>();
        assert_eq!(rows, vec![1, 2, 3, 5]);
        assert_eq!(load.errors[0].line, Some(4));
        assert!(load.errors[1].reason.contains("`image`"));
        assert!(load.errors[2].reason.contains("services/"));
        assert!(load.errors[3].reason.contains("duplicate service name"));
        assert_eq!(load.errors[3].name.as_deref(), Some("svc-d"));
    }

    #[test]
    fn one_image_is_built_by_one_service() {
        let text = r#"
schema_version = 1

[[services]]
name = "svc-a"
tier = "application"
path = "services/svc-a"
image = "acme/shared:1.0"

[[services]]
name = "svc-b"
tier = "application"
path = "services/svc-b"
image = "acme/shared:1.0"

[[services]]
name = "svc-c"
tier = "application"
path = "services/svc-c"
image = "acme/shared:2.0"
"#;
        let load = parse_registry_document("services.toml", text, &policy()).expect("loads");
        let names = load.records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["svc-a", "svc-c"]);
        assert_eq!(load.errors.len(), 1);
        assert_eq!(load.errors[0].row, 2);
        assert_eq!(load.errors[0].name.as_deref(), Some("svc-b"));
        assert!(load.errors[0].reason.contains("already built by `svc-a`"));
    }

    #[test]
    fn markdown_table_registry() {
        let text = "# Services\n\n| Name | Tier | Path | Image | Codename |\n|---|---|---|---|---|\n| `svc-a` | application | `services/svc-a` | `acme/svc-a:1.0` | |\n| svc-b | plugin | plugins/svc-b | acme/svc-b:1.0 | beta |\n| svc-c | plugin | plugins/svc-c |\n";
        let load = parse_registry_document("docs/services.md", text, &policy()).expect("md");
        assert_eq!(load.records.len(), 2);
        assert_eq!(load.records[0].declared_path, "services/svc-a");
        assert_eq!(load.records[1].codename, "beta");
        assert_eq!(load.errors.len(), 1);
        assert_eq!(load.errors[0].line, Some(7));
    }

    #[test]
    fn unreadable_documents_are_fatal() {
        for (path, text) in [
            ("services.toml", "schema_version = 1\n[[services]\n"),
            ("services.toml", "schema_version = 2\n"),
            ("services.toml", "schema_version = 1\nextra = true\n"),
            ("services.md", "| a | b |\n|---|---|\n"),
        ] {
            let err = parse_registry_document(path, text, &policy()).expect_err("fatal");
            assert_eq!(err.code(), "REGISTRY_UNREADABLE", "{path}: {text}");
        }
    }

    #[test]
    fn path_grammar_follows_tier_rules() {
        let mut tiers = TierRules::default();
        tiers.plugin.leaf = LeafRule::Codename;
        assert_eq!(
            check_declared_path("plugins/gamma", Tier::Plugin, "svc-g", "gamma", &tiers),
            Ok("plugins/gamma".to_string())
        );
        assert!(check_declared_path("plugins/svc-g", Tier::Plugin, "svc-g", "gamma", &tiers).is_err());
        assert!(check_declared_path("plugins", Tier::Plugin, "svc-g", "gamma", &tiers).is_err());
        assert!(check_declared_path("pluginsx/gamma", Tier::Plugin, "svc-g", "gamma", &tiers).is_err());
        assert!(check_declared_path("plugins/../gamma", Tier::Plugin, "svc-g", "gamma", &tiers).is_err());
    }

    #[test]
    fn normalizes_relative_paths() {
        assert_eq!(normalize_rel_path("./a/b/"), Some("a/b".to_string()));
        assert_eq!(normalize_rel_path("/a"), None);
        assert_eq!(normalize_rel_path("a//b"), None);
        assert_eq!(normalize_rel_path(""), None);
    }
}

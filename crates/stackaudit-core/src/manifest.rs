// SPDX-License-Identifier: Apache-2.0

//! Multi-stage build manifest parsing. Pure: callers hand in the file path
//! (for locations only) and its text.

use std::collections::BTreeMap;

use stackaudit_model::{
    CopyFromRef, DependencyKind, Directive, ImageRef, Manifest, ManifestError, ManifestStage,
    SourceRef, StageInstructions, StructuralIssue,
};

#[derive(Clone, Debug)]
struct Instruction {
    keyword: String,
    args: String,
    line: u32,
}

fn logical_instructions(text: &str) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut start_line = 0u32;
    let flush = |buf: &mut String, start_line: u32, out: &mut Vec<Instruction>| {
        let mut parts = buf.splitn(2, char::is_whitespace);
        let keyword = parts.next().unwrap_or("").to_ascii_uppercase();
        let args = parts.next().unwrap_or("").trim().to_string();
        if !keyword.is_empty() {
            out.push(Instruction {
                keyword,
                args,
                line: start_line,
            });
        }
        buf.clear();
    };
    for (idx, raw) in text.lines().enumerate() {
        let line_no = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if buf.is_empty() {
            start_line = line_no;
        } else {
            buf.push(' ');
        }
        if let Some(prefix) = trimmed.strip_suffix('\\') {
            buf.push_str(prefix.trim_end());
            continue;
        }
        buf.push_str(trimmed);
        flush(&mut buf, start_line, &mut out);
    }
    if !buf.is_empty() {
        flush(&mut buf, start_line, &mut out);
    }
    out
}

fn is_valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Expands `$NAME`, `${NAME}`, `${NAME:-default}` and `${NAME:+alt}` from
/// the global ARG defaults. Unknown names are left untouched.
fn substitute_args(raw: &str, args: &BTreeMap<String, Option<String>>) -> String {
    let lookup = |name: &str| args.get(name).and_then(Clone::clone);
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(body) = after.strip_prefix('{') {
            let Some(end) = body.find('}') else {
                out.push_str(&rest[pos..]);
                return out;
            };
            let expr = &body[..end];
            let replacement = if let Some((name, default)) = expr.split_once(":-") {
                Some(lookup(name).filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string()))
            } else if let Some((name, alt)) = expr.split_once(":+") {
                Some(if lookup(name).is_some_and(|v| !v.is_empty()) {
                    alt.to_string()
                } else {
                    String::new()
                })
            } else {
                lookup(expr)
            };
            match replacement {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[pos..pos + 2 + end + 1]),
            }
            rest = &body[end + 1..];
        } else {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..len];
            match lookup(name).filter(|_| !name.is_empty()) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[pos..pos + 1 + len]),
            }
            rest = &after[len..];
        }
    }
    out.push_str(rest);
    out
}

fn parse_global_args(args: &str, into: &mut BTreeMap<String, Option<String>>) {
    for token in args.split_whitespace() {
        match token.split_once('=') {
            Some((name, value)) => {
                into.insert(name.to_string(), Some(value.trim_matches('"').to_string()));
            }
            None => {
                into.entry(token.to_string()).or_insert(None);
            }
        }
    }
}

/// Splits on whitespace outside double quotes, dropping the quotes.
fn quoted_tokens(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in args.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn parse_labels(args: &str, into: &mut BTreeMap<String, String>) {
    let tokens = quoted_tokens(args);
    if tokens.first().is_some_and(|t| !t.contains('=')) {
        // legacy `LABEL key value with spaces`
        let key = tokens[0].clone();
        into.insert(key, tokens[1..].join(" "));
        return;
    }
    for token in tokens {
        if let Some((key, value)) = token.split_once('=') {
            into.insert(key.to_string(), value.to_string());
        }
    }
}

struct ParseState<'a> {
    file: &'a str,
    /// Every alias in the file, lowercased, with the index of its stage.
    declared_aliases: BTreeMap<String, usize>,
    /// Aliases of stages already closed or currently open, lowercased.
    defined_aliases: BTreeMap<String, (usize, u32)>,
    global_args: BTreeMap<String, Option<String>>,
    stages: Vec<ManifestStage>,
    errors: Vec<ManifestError>,
}

#[derive(Clone, Copy)]
enum RefSite {
    Base,
    CopyFrom,
}

impl ParseState<'_> {
    fn undefined(&mut self, line: u32, reference: &str) {
        self.errors.push(ManifestError::UndefinedStageReference {
            file: self.file.to_string(),
            line,
            reference: reference.to_string(),
        });
    }

    /// Resolves a reference made from stage `current`. Only stages with a
    /// strictly smaller index are visible.
    fn resolve(&mut self, raw: &str, current: usize, site: RefSite, line: u32) -> Option<SourceRef> {
        let expanded = match site {
            RefSite::Base => substitute_args(raw, &self.global_args),
            RefSite::CopyFrom => raw.to_string(),
        };
        let lower = expanded.to_ascii_lowercase();

        if let Some(&(index, _)) = self.defined_aliases.get(&lower) {
            if index < current {
                return Some(SourceRef::Stage {
                    index,
                    alias: self.stages[index].alias.clone(),
                });
            }
            self.undefined(line, raw);
            return None;
        }
        if !expanded.is_empty() && expanded.chars().all(|c| c.is_ascii_digit()) {
            return match expanded.parse::<usize>() {
                Ok(index) if index < current => Some(SourceRef::Stage {
                    index,
                    alias: self.stages[index].alias.clone(),
                }),
                _ => {
                    self.undefined(line, raw);
                    None
                }
            };
        }
        if matches!(site, RefSite::Base) && lower == "scratch" {
            return Some(SourceRef::Scratch);
        }
        if self.declared_aliases.contains_key(&lower) {
            // alias of this or a later stage
            self.undefined(line, raw);
            return None;
        }
        if expanded.contains('$') {
            return Some(SourceRef::Unresolved {
                expression: expanded,
            });
        }
        let qualified = expanded.contains('/') || expanded.contains(':') || expanded.contains('@');
        if matches!(site, RefSite::CopyFrom) && !qualified {
            self.undefined(line, raw);
            return None;
        }
        match ImageRef::parse(&expanded) {
            Ok(reference) => Some(SourceRef::External { reference }),
            Err(_) => {
                self.undefined(line, raw);
                None
            }
        }
    }

    fn start_stage(&mut self, ins: &Instruction) {
        let index = self.stages.len();
        let mut tokens = ins.args.split_whitespace().peekable();
        let mut platform = None;
        while let Some(option) = tokens.peek().filter(|t| t.starts_with("--")).copied() {
            if let Some(value) = option.strip_prefix("--platform=") {
                platform = Some(value.to_string());
            }
            tokens.next();
        }
        let reference = tokens.next();
        let rest = tokens.collect::<Vec<_>>();
        let alias = match rest.as_slice() {
            [] => None,
            [kw, alias] if kw.eq_ignore_ascii_case("as") => Some(*alias),
            _ => {
                self.errors.push(ManifestError::MalformedFrom {
                    file: self.file.to_string(),
                    line: ins.line,
                    detail: format!("unexpected tokens `{}`", rest.join(" ")),
                });
                None
            }
        };

        let alias = match alias {
            Some(alias) if !is_valid_alias(alias) => {
                self.errors.push(ManifestError::MalformedFrom {
                    file: self.file.to_string(),
                    line: ins.line,
                    detail: format!("invalid stage alias `{alias}`"),
                });
                None
            }
            Some(alias) => {
                let key = alias.to_ascii_lowercase();
                if let Some(&(_, first_line)) = self.defined_aliases.get(&key) {
                    self.errors.push(ManifestError::DuplicateStageAlias {
                        file: self.file.to_string(),
                        line: ins.line,
                        alias: alias.to_string(),
                        first_line,
                    });
                } else {
                    self.defined_aliases.insert(key, (index, ins.line));
                }
                Some(alias.to_string())
            }
            None => None,
        };

        let base = match reference {
            Some(reference) => self.resolve(reference, index, RefSite::Base, ins.line),
            None => {
                self.errors.push(ManifestError::MalformedFrom {
                    file: self.file.to_string(),
                    line: ins.line,
                    detail: "missing base image reference".to_string(),
                });
                None
            }
        };

        self.stages.push(ManifestStage {
            index,
            line: ins.line,
            alias,
            platform,
            base: base.unwrap_or(SourceRef::Scratch),
            instructions: StageInstructions::default(),
        });
    }

    fn record_copy(&mut self, ins: &Instruction) {
        let current = self.stages.len() - 1;
        for token in ins.args.split_whitespace() {
            if !token.starts_with("--") {
                break;
            }
            if let Some(reference) = token.strip_prefix("--from=") {
                self.push_copy_ref(reference, current, DependencyKind::Copy, ins.line);
            }
        }
    }

    fn record_mounts(&mut self, ins: &Instruction) {
        let current = self.stages.len() - 1;
        for token in ins.args.split_whitespace() {
            if !token.starts_with("--") {
                break;
            }
            let Some(spec) = token.strip_prefix("--mount=") else {
                continue;
            };
            for pair in spec.split(',') {
                if let Some(reference) = pair.strip_prefix("from=") {
                    self.push_copy_ref(reference, current, DependencyKind::Mount, ins.line);
                }
            }
        }
    }

    fn push_copy_ref(&mut self, raw: &str, current: usize, via: DependencyKind, line: u32) {
        let raw = raw.trim_matches('"');
        if let Some(source) = self.resolve(raw, current, RefSite::CopyFrom, line) {
            self.stages[current]
                .instructions
                .copy_from_refs
                .push(CopyFromRef { source, via, line });
        }
    }
}

fn declared_aliases(instructions: &[Instruction]) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    let mut index = 0usize;
    for ins in instructions.iter().filter(|ins| ins.keyword == "FROM") {
        let tokens = ins
            .args
            .split_whitespace()
            .filter(|t| !t.starts_with("--"))
            .collect::<Vec<_>>();
        if let [_, kw, alias] = tokens.as_slice() {
            if kw.eq_ignore_ascii_case("as") {
                out.entry(alias.to_ascii_lowercase()).or_insert(index);
            }
        }
        index += 1;
    }
    out
}

pub fn parse_manifest(path: &str, text: &str) -> Result<Manifest, Vec<ManifestError>> {
    let instructions = logical_instructions(text);
    let mut state = ParseState {
        file: path,
        declared_aliases: declared_aliases(&instructions),
        defined_aliases: BTreeMap::new(),
        global_args: BTreeMap::new(),
        stages: Vec::new(),
        errors: Vec::new(),
    };

    for ins in &instructions {
        if ins.keyword == "FROM" {
            state.start_stage(ins);
            continue;
        }
        let Some(stage_idx) = state.stages.len().checked_sub(1) else {
            if ins.keyword == "ARG" {
                parse_global_args(&ins.args, &mut state.global_args);
            } else {
                state.errors.push(ManifestError::InstructionBeforeFrom {
                    file: path.to_string(),
                    line: ins.line,
                    keyword: ins.keyword.clone(),
                });
            }
            continue;
        };
        match ins.keyword.as_str() {
            "COPY" => state.record_copy(ins),
            "RUN" => state.record_mounts(ins),
            "USER" => {
                state.stages[stage_idx].instructions.user = Some(Directive {
                    value: ins.args.clone(),
                    line: ins.line,
                });
            }
            "HEALTHCHECK" => {
                state.stages[stage_idx].instructions.healthcheck = Some(Directive {
                    value: ins.args.clone(),
                    line: ins.line,
                });
            }
            "LABEL" => parse_labels(&ins.args, &mut state.stages[stage_idx].instructions.labels),
            _ => {}
        }
    }

    if state.stages.is_empty() && state.errors.is_empty() {
        state.errors.push(ManifestError::EmptyManifest {
            file: path.to_string(),
        });
    }
    if state.errors.is_empty() {
        Ok(Manifest {
            path: path.to_string(),
            stages: state.stages,
        })
    } else {
        Err(state.errors)
    }
}

/// Stage indices from `index` back through its stage bases, nearest first.
/// Only stage-to-stage inheritance is followed; external bases are opaque.
fn inheritance_chain(manifest: &Manifest, index: usize) -> Vec<usize> {
    let mut chain = vec![index];
    let mut cursor = index;
    while let Some(SourceRef::Stage { index: parent, .. }) =
        manifest.stages.get(cursor).map(|s| &s.base)
    {
        if *parent >= cursor {
            break;
        }
        chain.push(*parent);
        cursor = *parent;
    }
    chain
}

pub fn effective_user(manifest: &Manifest, index: usize) -> Option<&Directive> {
    inheritance_chain(manifest, index)
        .into_iter()
        .find_map(|idx| manifest.stages[idx].instructions.user.as_ref())
}

/// The nearest HEALTHCHECK in the chain; `HEALTHCHECK NONE` disables it.
pub fn effective_healthcheck(manifest: &Manifest, index: usize) -> Option<&Directive> {
    inheritance_chain(manifest, index)
        .into_iter()
        .find_map(|idx| manifest.stages[idx].instructions.healthcheck.as_ref())
        .filter(|d| {
            !d.value
                .split_whitespace()
                .next()
                .is_some_and(|w| w.eq_ignore_ascii_case("none"))
        })
}

pub fn effective_labels(manifest: &Manifest, index: usize) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for idx in inheritance_chain(manifest, index).into_iter().rev() {
        for (key, value) in &manifest.stages[idx].instructions.labels {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

pub fn is_root_user(value: &str) -> bool {
    let user = value.split(':').next().unwrap_or("").trim();
    user.is_empty() || user == "root" || user == "0"
}

pub fn structural_issues<S: AsRef<str>>(
    manifest: &Manifest,
    floating_tags: &[S],
) -> Vec<StructuralIssue> {
    let mut issues = Vec::new();
    let file = manifest.path.clone();
    for stage in &manifest.stages {
        let mut check = |source: &SourceRef, line: u32| match source {
            SourceRef::External { reference } if !reference.is_pinned(floating_tags) => {
                issues.push(StructuralIssue::UnpinnedBase {
                    file: file.clone(),
                    line,
                    reference: reference.to_string(),
                });
            }
            SourceRef::Unresolved { expression } => {
                issues.push(StructuralIssue::UnpinnedBase {
                    file: file.clone(),
                    line,
                    reference: expression.clone(),
                });
            }
            _ => {}
        };
        check(&stage.base, stage.line);
        for copy in &stage.instructions.copy_from_refs {
            check(&copy.source, copy.line);
        }
    }

    let Some(last) = manifest.final_stage() else {
        return issues;
    };
    match effective_user(manifest, last.index) {
        None => issues.push(StructuralIssue::RootUser {
            file: file.clone(),
            line: None,
            user: None,
        }),
        Some(user) if is_root_user(&user.value) => issues.push(StructuralIssue::RootUser {
            file: file.clone(),
            line: Some(user.line),
            user: Some(user.value.clone()),
        }),
        Some(_) => {}
    }
    if effective_healthcheck(manifest, last.index).is_none() {
        issues.push(StructuralIssue::MissingHealthcheck { file });
    }
    issues
}

// SPDX-License-Identifier: Apache-2.0

//! Findings produced by out-of-band lint and security scanners.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use stackaudit_model::{ExternalFinding, FindingSource, Severity};
use tracing::{debug, warn};

use crate::error::AuditError;
use crate::ports::{Fs, ProcessRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidExternalRecord {
    pub origin: String,
    pub index: usize,
    pub service: Option<String>,
    pub source: FindingSource,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalFindings {
    pub findings: Vec<ExternalFinding>,
    pub invalid: Vec<InvalidExternalRecord>,
}

impl ExternalFindings {
    pub fn extend(&mut self, other: ExternalFindings) {
        self.findings.extend(other.findings);
        self.invalid.extend(other.invalid);
    }
}

fn record_field<'a>(record: &'a Value, field: &str) -> Result<&'a str, String> {
    match record.get(field) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.trim()),
        Some(Value::String(_)) | None => Err(format!("missing `{field}`")),
        Some(_) => Err(format!("`{field}` must be a string")),
    }
}

fn parse_record(record: &Value, source: FindingSource) -> Result<ExternalFinding, String> {
    if !record.is_object() {
        return Err("record is not an object".to_string());
    }
    Ok(ExternalFinding {
        service: record_field(record, "service")?.to_string(),
        severity: Severity::parse(record_field(record, "severity")?)?,
        message: record_field(record, "message")?.to_string(),
        source,
    })
}

/// Accepts a JSON array of `{service, severity, message}` records or an
/// object carrying them under `findings`. Bad records are kept as invalid
/// entries; a document that is not JSON at all is a tool failure.
pub fn parse_external_findings(
    origin: &str,
    text: &str,
    source: FindingSource,
) -> Result<ExternalFindings, AuditError> {
    let document = serde_json::from_str::<Value>(text).map_err(|err| {
        AuditError::ExternalToolFailure {
            tool: origin.to_string(),
            detail: format!("output is not valid json: {err}"),
        }
    })?;
    let records = match &document {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("findings") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AuditError::ExternalToolFailure {
                    tool: origin.to_string(),
                    detail: "expected a `findings` array".to_string(),
                })
            }
        },
        _ => {
            return Err(AuditError::ExternalToolFailure {
                tool: origin.to_string(),
                detail: "expected a json array or object".to_string(),
            })
        }
    };

    let mut out = ExternalFindings::default();
    for (index, record) in records.iter().enumerate() {
        match parse_record(record, source) {
            Ok(finding) => out.findings.push(finding),
            Err(reason) => {
                warn!(origin, index, %reason, "invalid external finding");
                out.invalid.push(InvalidExternalRecord {
                    origin: origin.to_string(),
                    index,
                    service: record_field(record, "service").ok().map(str::to_string),
                    source,
                    reason,
                });
            }
        }
    }
    Ok(out)
}

pub fn load_external_file(
    fs: &dyn Fs,
    repo_root: &Path,
    path: &Path,
    source: FindingSource,
) -> Result<ExternalFindings, AuditError> {
    let origin = path.display().to_string();
    let text = fs
        .read_text(repo_root, path)
        .map_err(|err| AuditError::ExternalToolFailure {
            tool: origin.clone(),
            detail: err.to_string(),
        })?;
    parse_external_findings(&origin, &text, source)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCommand {
    pub program: String,
    pub args: Vec<String>,
    pub source: FindingSource,
    pub timeout: Duration,
}

/// Splits a command line on whitespace; single and double quotes group.
fn split_command_line(line: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    let mut pending = false;
    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                pending = true;
            }
            (None, c) if c.is_whitespace() => {
                if pending {
                    out.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            (None, c) => {
                current.push(c);
                pending = true;
            }
        }
    }
    if quote.is_some() {
        return Err(format!("unterminated quote in `{line}`"));
    }
    if pending {
        out.push(current);
    }
    Ok(out)
}

impl ScanCommand {
    pub fn parse(line: &str, source: FindingSource, timeout: Duration) -> Result<Self, AuditError> {
        let failure = |detail: String| AuditError::ExternalToolFailure {
            tool: line.to_string(),
            detail,
        };
        let mut words = split_command_line(line).map_err(failure)?.into_iter();
        let program = words
            .next()
            .ok_or_else(|| failure("scan command is empty".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
            source,
            timeout,
        })
    }
}

/// Runs the scanner and parses its stdout. A timeout, spawn failure or
/// non-zero exit fails the run rather than silently dropping findings.
pub fn run_scan_command(
    runner: &dyn ProcessRunner,
    repo_root: &Path,
    command: &ScanCommand,
) -> Result<ExternalFindings, AuditError> {
    debug!(program = %command.program, args = ?command.args, "running scan command");
    let capture = runner
        .run_captured(&command.program, &command.args, repo_root, command.timeout)
        .map_err(|err| AuditError::ExternalToolFailure {
            tool: command.program.clone(),
            detail: err.to_string(),
        })?;
    if capture.status != 0 {
        let stderr = capture.stderr.lines().next().unwrap_or("").trim();
        return Err(AuditError::ExternalToolFailure {
            tool: command.program.clone(),
            detail: format!("exited with status {}: {stderr}", capture.status),
        });
    }
    parse_external_findings(&command.program, &capture.stdout, command.source)
}

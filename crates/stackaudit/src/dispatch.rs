// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::time::Duration;

use stackaudit_core::render::{
    render_graph_dot, render_graph_text, render_impact_text, render_json, render_validation_text,
};
use stackaudit_core::{
    run_graph, run_impact, run_validate, AdapterError, AdapterSet, AuditError, AuditRequest,
    ExternalInputs, ScanCommand,
};
use stackaudit_model::{report_json_schema, FindingSource};
use stackaudit_policies::{canonical_policy_json, load_policy, policy_config_path, AuditPolicy};
use tracing::{debug, info};

use crate::adapters::{
    discover_repo_root, resolve_repo_root, RealFs, RealProcessRunner, RealWalk,
};
use crate::cli::{Cli, Command, FormatArg, GraphFormatArg, ScanSourceArg, ValidateArgs};
use crate::logging;

pub const EXIT_FATAL: i32 = 2;

pub(crate) fn run_cli(cli: Cli) -> i32 {
    logging::init(cli.quiet, cli.verbose);
    match execute(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("stackaudit: error[{}]: {err}", err.code());
            EXIT_FATAL
        }
    }
}

impl From<ScanSourceArg> for FindingSource {
    fn from(value: ScanSourceArg) -> Self {
        match value {
            ScanSourceArg::Lint => Self::ExternalLint,
            ScanSourceArg::Security => Self::ExternalSecurity,
        }
    }
}

fn repo_root(cli: &Cli) -> Result<PathBuf, AuditError> {
    let root = match &cli.repo_root {
        Some(explicit) => resolve_repo_root(explicit)?,
        None => {
            let cwd = std::env::current_dir().map_err(|err| AdapterError::Io {
                op: "current_dir",
                path: PathBuf::from("."),
                detail: err.to_string(),
            })?;
            discover_repo_root(&cwd)?
        }
    };
    debug!(repo_root = %root.display(), "repository root resolved");
    Ok(root)
}

fn load_request(cli: &Cli) -> Result<AuditRequest, AuditError> {
    let root = repo_root(cli)?;
    let policy = load_policy(&root, cli.config.as_deref())?;
    Ok(AuditRequest::new(root, policy))
}

fn write_output_if_requested(out: Option<&Path>, rendered: &str) -> Result<(), AuditError> {
    if let Some(path) = out {
        std::fs::write(path, format!("{rendered}\n")).map_err(|err| AdapterError::Io {
            op: "write",
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        info!(out = %path.display(), "report written");
    }
    Ok(())
}

fn emit(rendered: &str, out: Option<&Path>) -> Result<(), AuditError> {
    write_output_if_requested(out, rendered)?;
    println!("{rendered}");
    Ok(())
}

fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, AuditError> {
    render_json(value).map_err(|detail| AuditError::Render { detail })
}

fn execute(cli: &Cli) -> Result<i32, AuditError> {
    let adapters = AdapterSet {
        fs: &RealFs,
        walk: &RealWalk,
        process: &RealProcessRunner,
    };
    match &cli.command {
        Command::Validate(args) => run_validate_command(cli, adapters, args),
        Command::Graph {
            format,
            workers,
            out,
        } => {
            let mut request = load_request(cli)?;
            if let Some(workers) = workers {
                request.workers = usize::from(*workers);
            }
            let report = run_graph(adapters, &request)?;
            let rendered = match format {
                GraphFormatArg::Json => json(&report)?,
                GraphFormatArg::Text => render_graph_text(&report),
                GraphFormatArg::Dot => render_graph_dot(&report),
            };
            emit(&rendered, out.as_deref())?;
            Ok(0)
        }
        Command::Impact {
            changed,
            format,
            out,
        } => {
            let request = load_request(cli)?;
            let report = run_impact(adapters, &request, changed)?;
            let rendered = match format {
                FormatArg::Json => json(&report)?,
                FormatArg::Text => render_impact_text(&report),
            };
            emit(&rendered, out.as_deref())?;
            Ok(0)
        }
        Command::Config { format } => {
            let root = repo_root(cli)?;
            let policy = load_policy(&root, cli.config.as_deref())?;
            let rendered = match format {
                FormatArg::Json => canonical_policy_json(&policy)
                    .map_err(|err| AuditError::Render { detail: err.0 })?,
                FormatArg::Text => render_config_text(&root, cli.config.as_deref(), &policy)?,
            };
            emit(&rendered, None)?;
            Ok(0)
        }
        Command::Schema => {
            emit(&json(&report_json_schema())?, None)?;
            Ok(0)
        }
    }
}

fn run_validate_command(
    cli: &Cli,
    adapters: AdapterSet<'_>,
    args: &ValidateArgs,
) -> Result<i32, AuditError> {
    let mut request = load_request(cli)?;
    if let Some(registry) = &args.registry {
        request.registry = registry.clone();
    }
    if let Some(workers) = args.workers {
        request.workers = usize::from(workers);
    }
    let timeout = Duration::from_secs(
        args.timeout_seconds
            .unwrap_or(request.policy.external_timeout_seconds),
    );

    let mut inputs = ExternalInputs::default();
    inputs.files.extend(
        args.lint_findings
            .iter()
            .map(|path| (path.clone(), FindingSource::ExternalLint)),
    );
    inputs.files.extend(
        args.security_findings
            .iter()
            .map(|path| (path.clone(), FindingSource::ExternalSecurity)),
    );
    if let Some(line) = &args.scan_command {
        inputs.command = Some(ScanCommand::parse(line, args.scan_source.into(), timeout)?);
    }

    let report = run_validate(adapters, &request, &inputs)?;
    let rendered = match args.format {
        FormatArg::Json => json(&report)?,
        FormatArg::Text => render_validation_text(&report),
    };
    emit(&rendered, args.out.as_deref())?;
    Ok(report.exit_code)
}

fn render_config_text(
    root: &Path,
    explicit: Option<&Path>,
    policy: &AuditPolicy,
) -> Result<String, AuditError> {
    let source = match explicit {
        Some(path) => path.display().to_string(),
        None if policy_config_path(root).is_file() => policy_config_path(root).display().to_string(),
        None => "built-in defaults".to_string(),
    };
    let body = toml::to_string_pretty(policy).map_err(|err| AuditError::Render {
        detail: format!("encode config failed: {err}"),
    })?;
    Ok(format!("# source: {source}\n{}", body.trim_end()))
}

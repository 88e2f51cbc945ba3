// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::dispatch;

pub(crate) fn run() -> i32 {
    let cli = Cli::parse();
    dispatch::run_cli(cli)
}

#[derive(Parser, Debug)]
#[command(name = "stackaudit", version, disable_help_subcommand = true)]
#[command(about = "Validate a service registry against the repository's build manifests")]
pub struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    pub quiet: bool,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Repository root; discovered from the working directory when omitted.
    #[arg(long, global = true)]
    pub repo_root: Option<PathBuf>,
    /// Configuration file; defaults to `stackaudit.toml` under the root.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check registry, manifests and tree layout; exit 1 on actionable findings.
    Validate(ValidateArgs),
    /// Print the image dependency graph.
    Graph {
        #[arg(long, value_enum, default_value_t = GraphFormatArg::Text)]
        format: GraphFormatArg,
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
        workers: Option<u16>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List services that must be rebuilt when an image or path changes.
    Impact {
        #[arg(long, value_name = "IMAGE|NODE|PATH")]
        changed: String,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config {
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Print the JSON schema of the `validate --format json` report.
    Schema,
}

#[derive(clap::Args, Debug)]
pub struct ValidateArgs {
    /// Registry document relative to the root; overrides the configuration.
    #[arg(long)]
    pub registry: Option<String>,
    #[arg(long = "lint-findings", value_name = "PATH")]
    pub lint_findings: Vec<PathBuf>,
    #[arg(long = "security-findings", value_name = "PATH")]
    pub security_findings: Vec<PathBuf>,
    /// Scanner to run; its stdout must be a JSON findings document.
    #[arg(long = "scan-command", value_name = "CMD")]
    pub scan_command: Option<String>,
    #[arg(long = "scan-source", value_enum, default_value_t = ScanSourceArg::Lint)]
    pub scan_source: ScanSourceArg,
    #[arg(long = "timeout-seconds", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_seconds: Option<u64>,
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub workers: Option<u16>,
    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    pub format: FormatArg,
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum GraphFormatArg {
    Text,
    Json,
    Dot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ScanSourceArg {
    Lint,
    Security,
}

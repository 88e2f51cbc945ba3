// SPDX-License-Identifier: Apache-2.0

use super::*;
use std::path::Path;
use std::time::Duration;

use crate::testing::MemoryRepo;
use stackaudit_model::{codes, ImpactResolution, Severity};

struct DeniedProcessRunner;

impl ProcessRunner for DeniedProcessRunner {
    fn run_captured(
        &self,
        program: &str,
        _args: &[String],
        _repo_root: &Path,
        _timeout: Duration,
    ) -> Result<CommandCapture, AdapterError> {
        Err(AdapterError::Process {
            program: program.to_string(),
            detail: "subprocesses are not available in tests".to_string(),
        })
    }
}

const REGISTRY: &str = r#"schema_version = 1

[[services]]
name = "base"
tier = "core"
path = "core/base"
image = "acme/base:1.0"

[[services]]
name = "svc-a"
tier = "application"
path = "services/svc-a"
image = "acme/svc-a:1.0"

[[services]]
name = "svc-b"
tier = "application"
path = "services/svc-b"
image = "acme/svc-b:1.0"
"#;

const CLEAN_TAIL: &str = "USER app\nHEALTHCHECK CMD [\"/bin/true\"]\n";

fn clean_repo() -> MemoryRepo {
    MemoryRepo::default()
        .with("registry/services.toml", REGISTRY)
        .with(
            "core/base/Dockerfile",
            &format!("FROM debian:12-slim\n{CLEAN_TAIL}"),
        )
        .with(
            "services/svc-a/Dockerfile",
            &format!("FROM acme/base:1.0\n{CLEAN_TAIL}"),
        )
        .with(
            "services/svc-b/Dockerfile",
            &format!(
                "FROM acme/base:1.0 AS deps\nRUN make deps\nFROM deps\nCOPY --from=deps /opt /opt\n{CLEAN_TAIL}"
            ),
        )
}

fn request() -> AuditRequest {
    AuditRequest::new(PathBuf::from("/repo"), AuditPolicy::default())
}

fn adapters<'a>(repo: &'a MemoryRepo, process: &'a DeniedProcessRunner) -> AdapterSet<'a> {
    AdapterSet {
        fs: repo,
        walk: repo,
        process,
    }
}

#[test]
fn consistent_repository_has_no_findings() {
    let repo = clean_repo();
    let report = run_validate(
        adapters(&repo, &DeniedProcessRunner),
        &request(),
        &ExternalInputs::default(),
    )
    .expect("validate");
    assert!(report.findings.is_empty(), "{:?}", report.findings);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.services, 3);
    assert_eq!(report.manifests, 3);
}

#[test]
fn orphan_directory_is_reported_once() {
    let repo = clean_repo().with(
        "services/svc-c/Dockerfile",
        &format!("FROM alpine:3.20\n{CLEAN_TAIL}"),
    );
    let report = run_validate(
        adapters(&repo, &DeniedProcessRunner),
        &request(),
        &ExternalInputs::default(),
    )
    .expect("validate");
    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.code, codes::ORPHAN_DIRECTORY);
    assert_eq!(finding.service, "svc-c");
    assert_eq!(report.exit_code, 1);
}

#[test]
fn undefined_copy_source_is_reported_with_location() {
    let repo = clean_repo().with(
        "services/svc-a/Dockerfile",
        &format!("FROM acme/base:1.0\nCOPY --from=builder /out /out\n{CLEAN_TAIL}"),
    );
    let report = run_validate(
        adapters(&repo, &DeniedProcessRunner),
        &request(),
        &ExternalInputs::default(),
    )
    .expect("validate");
    assert_eq!(report.findings.len(), 1, "{:?}", report.findings);
    let finding = &report.findings[0];
    assert_eq!(finding.code, codes::UNDEFINED_STAGE_REFERENCE);
    assert_eq!(finding.path.as_deref(), Some("services/svc-a/Dockerfile"));
    assert_eq!(finding.line, Some(2));

    let graph = run_graph(adapters(&repo, &DeniedProcessRunner), &request()).expect("graph");
    assert_eq!(graph.skipped.len(), 1);
    assert_eq!(graph.skipped[0].path, "services/svc-a/Dockerfile");
}

#[test]
fn unreadable_manifest_is_a_finding_not_a_failed_run() {
    let repo = clean_repo().with_unreadable("services/svc-a/Dockerfile");
    let report = run_validate(
        adapters(&repo, &DeniedProcessRunner),
        &request(),
        &ExternalInputs::default(),
    )
    .expect("validate");
    assert_eq!(report.findings.len(), 1, "{:?}", report.findings);
    let finding = &report.findings[0];
    assert_eq!(finding.code, codes::UNREADABLE_MANIFEST);
    assert_eq!(finding.service, "svc-a");
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.path.as_deref(), Some("services/svc-a/Dockerfile"));
    assert_eq!(report.exit_code, 1);
    assert_eq!(report.services, 3);
    assert_eq!(report.manifests, 3);

    let graph = run_graph(adapters(&repo, &DeniedProcessRunner), &request()).expect("graph");
    assert_eq!(graph.skipped.len(), 1);
    assert_eq!(graph.skipped[0].path, "services/svc-a/Dockerfile");

    let impact = run_impact(adapters(&repo, &DeniedProcessRunner), &request(), "acme/base:1.0")
        .expect("impact");
    assert_eq!(impact.impact.names(), vec!["svc-b"]);
}

#[test]
fn validation_is_deterministic_across_worker_counts() {
    let repo = clean_repo()
        .with("services/svc-c/Dockerfile", "FROM alpine:latest\n")
        .with("services/svc-a/Dockerfile", "FROM acme/base:1.0\nUSER root\n");
    let mut serial = request();
    serial.workers = 1;
    let mut parallel = request();
    parallel.workers = 8;
    let a = run_validate(adapters(&repo, &DeniedProcessRunner), &serial, &ExternalInputs::default())
        .expect("serial");
    let b = run_validate(adapters(&repo, &DeniedProcessRunner), &parallel, &ExternalInputs::default())
        .expect("parallel");
    assert_eq!(
        render::render_json(&a).expect("json"),
        render::render_json(&b).expect("json")
    );
    assert_eq!(a.findings_sha256, b.findings_sha256);
}

#[test]
fn impact_of_shared_base_covers_all_builders() {
    let repo = clean_repo();
    let report = run_impact(adapters(&repo, &DeniedProcessRunner), &request(), "acme/base:1.0")
        .expect("impact");
    assert_eq!(report.impact.resolution, ImpactResolution::Node);
    assert_eq!(report.impact.names(), vec!["svc-a", "svc-b"]);

    let leaf = run_impact(adapters(&repo, &DeniedProcessRunner), &request(), "acme/svc-b:1.0")
        .expect("leaf");
    assert!(leaf.impact.services.is_empty());
}

#[test]
fn missing_registry_is_fatal() {
    let repo = MemoryRepo::default().with("services/svc-a/Dockerfile", "FROM alpine:3.20\n");
    let err = run_validate(
        adapters(&repo, &DeniedProcessRunner),
        &request(),
        &ExternalInputs::default(),
    )
    .expect_err("fatal");
    assert_eq!(err.code(), "REGISTRY_UNREADABLE");
}

#[test]
fn external_findings_are_merged_and_failures_are_fatal() {
    let repo = clean_repo().with(
        "reports/security.json",
        r#"{"findings":[{"service":"svc-a","severity":"critical","message":"CVE-2024-1234 in openssl"}]}"#,
    );
    let inputs = ExternalInputs {
        files: vec![(
            PathBuf::from("reports/security.json"),
            FindingSource::ExternalSecurity,
        )],
        command: None,
    };
    let report =
        run_validate(adapters(&repo, &DeniedProcessRunner), &request(), &inputs).expect("validate");
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].code, codes::EXTERNAL_SECURITY);
    assert_eq!(report.counts.critical, 1);

    let with_command = ExternalInputs {
        files: Vec::new(),
        command: Some(
            ScanCommand::parse(
                "hadolint --format json",
                FindingSource::ExternalLint,
                Duration::from_secs(5),
            )
            .expect("command"),
        ),
    };
    let err = run_validate(adapters(&repo, &DeniedProcessRunner), &request(), &with_command)
        .expect_err("process denied");
    assert_eq!(err.code(), "EXTERNAL_TOOL_FAILURE");
}

#[test]
fn severity_overrides_change_exit_code() {
    let repo = clean_repo().with(
        "services/svc-c/Dockerfile",
        &format!("FROM alpine:3.20\n{CLEAN_TAIL}"),
    );
    let mut req = request();
    req.policy
        .severity
        .insert(codes::ORPHAN_DIRECTORY.to_string(), stackaudit_model::Severity::Low);
    let report = run_validate(adapters(&repo, &DeniedProcessRunner), &req, &ExternalInputs::default())
        .expect("validate");
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.exit_code, 0);
}

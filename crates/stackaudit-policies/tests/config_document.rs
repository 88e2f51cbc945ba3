// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};

use stackaudit_model::{codes, Severity};
use stackaudit_policies::{load_policy, AuditPolicy, LeafRule, POLICY_FILE_NAME};

fn example_config() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs/stackaudit.example.toml")
}

#[test]
fn shipped_example_config_is_valid() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let policy = load_policy(tmp.path(), Some(&example_config())).expect("example config");
    assert_eq!(policy.tiers.plugin.leaf, LeafRule::Codename);
    assert_eq!(policy.tiers.application.leaf, LeafRule::Name);
    assert_eq!(
        policy.severity.get(codes::MISSING_HEALTHCHECK),
        Some(&Severity::Medium)
    );
    assert_eq!(policy.workers, AuditPolicy::default().workers);
}

#[test]
fn root_config_is_optional_but_explicit_config_is_not() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert_eq!(
        load_policy(tmp.path(), None).expect("defaults"),
        AuditPolicy::default()
    );
    let err = load_policy(tmp.path(), Some(Path::new("ci/stackaudit.toml"))).expect_err("missing");
    assert!(err.0.contains("ci/stackaudit.toml"), "{err}");
}

#[test]
fn root_config_errors_name_the_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(tmp.path().join(POLICY_FILE_NAME), "workers = 0\n").expect("write");
    let err = load_policy(tmp.path(), None).expect_err("invalid");
    assert!(err.0.contains(POLICY_FILE_NAME), "{err}");
    assert!(err.0.contains("workers"), "{err}");
}

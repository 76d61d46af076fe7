//! Manifest parsing and validation.

use std::path::PathBuf;

use citadel::manifest::{Expectation, Manifest, ManifestError, Step};
use citadel::{Keycode, Permission, Version};

fn demo_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/treasury.toml")
}

#[test]
fn demo_manifest_loads() {
    let manifest = Manifest::load(&demo_path()).expect("demo manifest should load");
    assert_eq!(manifest.modules.len(), 2);
    assert_eq!(manifest.policies.len(), 2);
    assert!(!manifest.steps.is_empty());

    let v2 = manifest.module("treasury_v2").expect("treasury_v2 declared");
    assert_eq!(v2.version(), Version::new(1, 1));
    let payroll = manifest.policy("payroll").expect("payroll declared");
    assert_eq!(
        payroll.permissions,
        vec![Permission::new(Keycode::parse("TRSRY").expect("keycode"), "withdraw")]
    );
}

#[test]
fn defaults_apply() {
    let manifest = Manifest::from_toml(
        r#"
[[modules]]
name = "m"
keycode = "MODA"

[[steps]]
action = "install"
module = "m"
"#,
    )
    .expect("minimal manifest");

    let module = manifest.module("m").expect("declared");
    assert_eq!(module.version(), Version::new(1, 0));
    assert!(module.operations.is_empty());
    assert_eq!(manifest.steps[0].expect, Expectation::Ok);
    assert!(manifest.steps[0].issuer.is_none());
}

#[test]
fn step_fields_parse() {
    let manifest = Manifest::from_toml(
        r#"
[[steps]]
action = "change_executor"
to = "council"
as = "mallory"
expect = "error"

[[steps]]
action = "call"
caller = "q"
keycode = "MODA"
operation = "opX"
"#,
    )
    .expect("manifest");

    let first = &manifest.steps[0];
    assert!(matches!(&first.step, Step::ChangeExecutor { to } if to == "council"));
    assert_eq!(first.issuer.as_deref(), Some("mallory"));
    assert_eq!(first.expect, Expectation::Error);
    assert_eq!(manifest.steps[1].step.to_string(), "q calls MODA.opX");
}

#[test]
fn invalid_keycode_is_a_parse_error() {
    let result = Manifest::from_toml(
        r#"
[[modules]]
name = "m"
keycode = "moda"
"#,
    );
    assert!(matches!(result, Err(ManifestError::Parse(_))));
}

#[test]
fn duplicate_names_are_rejected() {
    let modules = Manifest::from_toml(
        r#"
[[modules]]
name = "m"
keycode = "MODA"

[[modules]]
name = "m"
keycode = "MODB"
"#,
    );
    assert!(matches!(modules, Err(ManifestError::DuplicateModule(name)) if name == "m"));

    let policies = Manifest::from_toml(
        r#"
[[policies]]
name = "p"

[[policies]]
name = "p"
"#,
    );
    assert!(matches!(policies, Err(ManifestError::DuplicatePolicy(name)) if name == "p"));
}

#[test]
fn unknown_references_are_rejected() {
    let module = Manifest::from_toml(
        r#"
[[steps]]
action = "upgrade"
module = "ghost"
"#,
    );
    assert!(matches!(
        module,
        Err(ManifestError::UnknownModule { step: 0, ref name }) if name == "ghost"
    ));

    let policy = Manifest::from_toml(
        r#"
[[policies]]
name = "p"

[[steps]]
action = "approve"
policy = "p"

[[steps]]
action = "terminate"
policy = "q"
"#,
    );
    assert!(matches!(
        policy,
        Err(ManifestError::UnknownPolicy { step: 1, ref name }) if name == "q"
    ));
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let err = Manifest::load(&path).expect_err("missing manifest should fail");
    assert!(format!("{err:#}").contains("absent.toml"));
}

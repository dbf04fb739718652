//! Integration tests for the corral binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn corral(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("corral").unwrap();
    cmd.env("CORRAL_CONFIG", dir.join("corral.conf"))
        .env("CORRAL_CONFIG_DIR", dir.join("corral.conf.d"));
    cmd
}

#[test]
fn test_config_prints_merged_toml() {
    let temp = tempdir().unwrap();
    std::fs::write(
        temp.path().join("corral.conf"),
        "[corral.runtime]\nctr_stop_timeout = 75\n",
    )
    .unwrap();

    corral(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[corral.runtime]"))
        .stdout(predicate::str::contains("ctr_stop_timeout = 75"))
        .stdout(predicate::str::contains("[corral.runtime.runtimes.runc]"));
}

#[test]
fn test_config_writes_output_file() {
    let temp = tempdir().unwrap();
    let output = temp.path().join("out.conf");

    corral(temp.path())
        .args(["config", "--output"])
        .arg(&output)
        .assert()
        .success();
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("[corral]"));
}

#[test]
fn test_check_accepts_defaults() {
    let temp = tempdir().unwrap();
    corral(temp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_check_rejects_missing_default_runtime() {
    let temp = tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join("corral.conf.d")).unwrap();
    std::fs::write(
        temp.path().join("corral.conf.d/99-runtime.conf"),
        "[corral.runtime]\ndefault_runtime = \"ghost\"\n",
    )
    .unwrap();

    corral(temp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_malformed_file_names_the_fragment() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("corral.conf"), "[corral\n").unwrap();

    corral(temp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("corral.conf"));
}

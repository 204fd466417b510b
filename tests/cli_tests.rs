use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sample_app() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample_app");
    let assets = temp.path().join("assets");
    kiln::static_copy::copy_tree(&fixture, &assets).unwrap();
    (temp, assets)
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build front-end asset trees"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_init_command() {
    let temp_dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("init")
        .arg("--output-dir")
        .arg(temp_dir.path())
        .assert()
        .success();

    // Check that config file was created
    let config_path = temp_dir.path().join("kiln.toml");
    assert!(config_path.exists());
    let content = std::fs::read_to_string(config_path).unwrap();
    assert!(content.starts_with("# Kiln build configuration"));
    assert!(content.contains("[[entries]]"));
}

#[test]
fn test_build_command() {
    let (temp, assets) = sample_app();

    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("--config")
        .arg(assets.join("kiln.toml"))
        .arg("build")
        .assert()
        .success()
        .stdout(predicate::str::contains("Built"));

    assert!(temp.path().join("priv/static/js/app.js").is_file());
    assert!(temp.path().join("priv/static/css/app.css").is_file());
}

#[test]
fn test_build_unknown_entry_fails() {
    let (_temp, assets) = sample_app();

    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("--config")
        .arg(assets.join("kiln.toml"))
        .arg("build")
        .arg("--entry")
        .arg("admin")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Build failed [configuration]"))
        .stderr(predicate::str::contains("unknown entry 'admin'"));
}

#[test]
fn test_build_missing_config_fails() {
    let temp_dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("--config")
        .arg(temp_dir.path().join("missing.toml"))
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn test_graph_command() {
    let (_temp, assets) = sample_app();

    let mut cmd = Command::cargo_bin("kiln").unwrap();
    let output = cmd
        .arg("--config")
        .arg(assets.join("kiln.toml"))
        .arg("graph")
        .arg("app")
        .output()
        .unwrap();

    assert!(output.status.success());
    let graph: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(graph["modules"].as_array().unwrap().len(), 6);
    assert_eq!(graph["modules"][4]["kind"], "component");
}

#[test]
fn test_completions_command() {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.arg("completions")
        .arg("bash")
        .assert()
        .success()
        .stdout(predicate::str::contains("kiln"));
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const BUILD_FILE: &str = r#"
name: web
stages:
  - name: base
    from: python:3.12-slim
    steps:
      - type: workdir
        path: /app
  - name: builder
    from: base
    steps:
      - type: copy
        src: requirements.txt
        dest: .
      - type: run
        command: pip install -r requirements.txt --target "$BUILD_ROOT/libs"
  - name: runtime
    from: base
    steps:
      - type: copy
        from: builder
        src: /app/requirements.txt
        dest: /app/
      - type: copy
        src: src/
        dest: .
      - type: expose
        port: 8000
      - type: cmd
        args: [run-server, "0.0.0.0:8000"]
"#;

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".buildflow.yaml"), BUILD_FILE).unwrap();
    fs::write(dir.path().join("requirements.txt"), "flask\n").unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/manage.py"), "print('manage')\n").unwrap();
    dir
}

fn buildflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("buildflow").unwrap();
    cmd.current_dir(dir.path())
        .env("NO_COLOR", "1")
        .env_remove("BUILDFLOW_FILE")
        .env_remove("BUILDFLOW_CONTEXT")
        .env_remove("BUILDFLOW_IMAGES");
    cmd
}

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    buildflow(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("graph"));
}

#[test]
fn test_validate() {
    let dir = project();
    buildflow(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build file is valid"));
}

#[test]
fn test_validate_reports_missing_source() {
    let dir = project();
    fs::remove_dir_all(dir.path().join("src")).unwrap();

    buildflow(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Source not found in build context: src/"));
}

#[test]
fn test_graph_mermaid() {
    let dir = project();
    buildflow(&dir)
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graph TD"))
        .stdout(predicate::str::contains("s1 -. copy .-> s2"));
}

#[test]
fn test_graph_text() {
    let dir = project();
    buildflow(&dir)
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. base (from python:3.12-slim"))
        .stdout(predicate::str::contains("3. runtime"));
}

#[test]
fn test_dry_run_build_exports_image() {
    let dir = project();
    buildflow(&dir)
        .args(["build", "--dry-run", "--output", "out", "--tar", "image.tar.gz"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Digest:"));

    assert!(dir.path().join("out/rootfs/app/manage.py").is_file());
    assert!(dir.path().join("out/rootfs/app/requirements.txt").is_file());
    assert!(dir.path().join("image.tar.gz").is_file());

    let config = fs::read_to_string(dir.path().join("out/config.json")).unwrap();
    assert!(config.contains("\"exposed_port\": 8000"));
    assert!(config.contains("run-server"));
}

#[test]
fn test_build_target() {
    let dir = project();
    buildflow(&dir)
        .args(["build", "--dry-run", "--target", "builder", "-o", "out"])
        .assert()
        .success();

    assert!(dir.path().join("out/rootfs/app/requirements.txt").is_file());
    assert!(!dir.path().join("out/rootfs/app/manage.py").exists());
}

#[test]
fn test_missing_build_file() {
    let dir = TempDir::new().unwrap();
    buildflow(&dir)
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Build file not found"));
}

#[test]
fn test_forward_copy_fails() {
    let dir = project();
    fs::write(
        dir.path().join("Dockerfile"),
        "FROM alpine AS runtime\nCOPY --from=builder /libs /libs\n\nFROM alpine AS builder\n",
    )
    .unwrap();

    buildflow(&dir)
        .args(["build", "--dry-run", "-f", "Dockerfile"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("builder"));
}

#[test]
fn test_init_scaffold() {
    let dir = TempDir::new().unwrap();
    buildflow(&dir).args(["init", "demo"]).assert().success();

    assert!(dir.path().join(".buildflow.yaml").is_file());
    assert!(dir.path().join("requirements.txt").is_file());
    assert!(dir.path().join("src/app.py").is_file());

    buildflow(&dir).arg("validate").assert().success();
    buildflow(&dir).args(["init", "demo"]).assert().failure();
}

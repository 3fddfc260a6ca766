//! Integration tests for the workpipe binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("workpipe").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bounded pool"))
        .stdout(predicate::str::contains("budget"));
}

#[test]
fn test_invalid_subcommand() {
    let mut cmd = Command::cargo_bin("workpipe").unwrap();
    cmd.arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_budget_memory_cap() {
    let mut cmd = Command::cargo_bin("workpipe").unwrap();
    cmd.args([
        "budget",
        "--items",
        "10",
        "--max-workers",
        "4",
        "--available-memory",
        "1000",
        "--per-item-memory",
        "400",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("batch workers: 2"))
    .stdout(predicate::str::contains("batch strategy: pool of 2"));
}

#[test]
fn test_run_inline_with_default_suffix() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("a.txt");
    fs::write(&input, "hello\n").unwrap();

    let mut cmd = Command::cargo_bin("workpipe").unwrap();
    cmd.current_dir(temp.path())
        .args(["run", "--workers", "1"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("a.out.txt"));

    assert_eq!(fs::read_to_string(temp.path().join("a.out.txt")).unwrap(), "hello\n");
}

#[test]
fn test_run_process_pool_into_outdir() {
    let temp = TempDir::new().unwrap();
    let mut inputs = Vec::new();
    for name in ["one.txt", "two.txt", "three.txt"] {
        let path = temp.path().join(name);
        fs::write(&path, name).unwrap();
        inputs.push(path);
    }
    let outdir = temp.path().join("out");

    let mut cmd = Command::cargo_bin("workpipe").unwrap();
    cmd.current_dir(temp.path())
        .args(["run", "--backend", "process", "--workers", "2", "--create-outdir", "--outdir"])
        .arg(&outdir)
        .args(&inputs)
        .assert()
        .success();

    for name in ["one", "two", "three"] {
        let output = outdir.join(format!("{name}.out.txt"));
        assert_eq!(fs::read_to_string(output).unwrap(), format!("{name}.txt"));
    }
}

#[test]
fn test_run_reports_missing_input_as_dropped() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("there.txt");
    fs::write(&input, "x").unwrap();

    let mut cmd = Command::cargo_bin("workpipe").unwrap();
    cmd.current_dir(temp.path())
        .args(["run", "--backend", "thread", "--workers", "2", "--json", "missing.txt"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"input\": \"missing.txt\""))
        .stdout(predicate::str::contains("\"output\": null"))
        .stdout(predicate::str::contains("there.out.txt"));
}

#[test]
fn test_run_requires_outdir_creation_flag() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("a.txt");
    fs::write(&input, "x").unwrap();

    let mut cmd = Command::cargo_bin("workpipe").unwrap();
    cmd.current_dir(temp.path())
        .args(["run", "--workers", "1", "--prune", "--outdir", "nope"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(!temp.path().join("nope").exists());
}

//! End-to-end tests for the rmtest binary.
//!
//! No real server or module is needed: these cover the failure paths that
//! must stop the run with a non-zero exit status.

use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

fn rmtest_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rmtest"))
}

fn run_rmtest(dir: &TempDir, args: &[&str]) -> Output {
    Command::new(rmtest_binary())
        .args(args)
        .current_dir(dir.path())
        .env("REDIS_PATH", dir.path().join("missing-redis-server"))
        .env_remove("REDIS_VERBOSE")
        .env_remove("REDIS_DEBUGGER")
        .env_remove("TESTMODULE_SO")
        .output()
        .expect("Failed to run rmtest")
}

#[test]
fn test_help_lists_flags() {
    let output = Command::new(rmtest_binary())
        .arg("--help")
        .output()
        .expect("Failed to run rmtest");

    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for flag in ["--source", "--module", "--filter", "--no-compile"] {
        assert!(help.contains(flag), "missing {} in:\n{}", flag, help);
    }
}

#[test]
fn test_missing_server_fails_run() {
    let dir = TempDir::new().unwrap();
    let output = run_rmtest(&dir, &["-N", "-m", "mod.so"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("exited before becoming ready"),
        "unexpected stderr:\n{}",
        stderr
    );
}

#[test]
fn test_failed_build_skips_server() {
    let dir = TempDir::new().unwrap();
    // Source doesn't exist, so the build fails whether or not make is installed.
    let output = run_rmtest(&dir, &["-i", "nope.c", "-m", "nope.so"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Couldn't compile module nope.so"),
        "unexpected stderr:\n{}",
        stderr
    );
    assert!(!stderr.contains("exited before becoming ready"));
}

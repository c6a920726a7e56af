//! Binary-level checks: log destinations and exit codes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn coursegen(temp_dir: &TempDir, workspace: &Path, args: &[&str]) -> Output {
    let config_home = temp_dir.path().join("config");
    let home = temp_dir.path().join("home");
    fs::create_dir_all(&config_home).unwrap();
    fs::create_dir_all(&home).unwrap();
    fs::create_dir_all(workspace).unwrap();

    Command::new(env!("CARGO_BIN_EXE_coursegen"))
        .env("XDG_CONFIG_HOME", config_home.as_os_str())
        .env("HOME", home.as_os_str())
        .env_remove("COURSEGEN_ENV")
        .env_remove("COURSEGEN_LOG")
        .arg("--workspace")
        .arg(workspace)
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_file_output_writes_under_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("ws");

    let output = coursegen(&temp_dir, &workspace, &["--log-output", "file", "status"]);
    assert!(
        output.status.success(),
        "coursegen status should succeed: stderr={:?}",
        String::from_utf8_lossy(&output.stderr)
    );

    let log_path = workspace.join(".coursegen").join("coursegen.log");
    assert!(log_path.exists(), "log file should exist at {}", log_path.display());
    let content = fs::read_to_string(&log_path).unwrap();
    assert!(
        content.contains("coursegen CLI starting"),
        "log file should contain the startup message; got: {}",
        content.lines().next().unwrap_or("")
    );
}

#[test]
fn test_quiet_mode_emits_no_logs() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("ws");

    let output = coursegen(&temp_dir, &workspace, &["--quiet", "pending"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).trim().is_empty());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0 pending spec(s)");
    assert!(!workspace.join(".coursegen").join("coursegen.log").exists());
}

#[test]
fn test_json_format_on_stderr() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("ws");

    let output = coursegen(
        &temp_dir,
        &workspace,
        &["--log-format", "json", "--log-level", "info", "schemas"],
    );
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    let first = stderr.lines().next().expect("at least one log line");
    let value: serde_json::Value = serde_json::from_str(first).unwrap();
    assert!(value.get("timestamp").is_some());
    assert!(value.get("level").is_some());
}

#[test]
fn test_fatal_errors_exit_with_one() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("ws");

    // Neither a key nor --failed.
    let output = coursegen(&temp_dir, &workspace, &["--quiet", "reset"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&output.stderr).trim().is_empty());
}

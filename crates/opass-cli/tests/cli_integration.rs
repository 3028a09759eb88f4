//! CLI integration tests
//!
//! Tests the opass CLI using assert_cmd.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn opass() -> Command {
    Command::cargo_bin("opass")
        .expect("Failed to locate opass binary - ensure it's built before running tests")
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let credentials = dir.join("credentials.json");
    std::fs::write(
        &path,
        format!(
            "credentials_path = {:?}\n{}",
            credentials.to_string_lossy(),
            extra
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    opass()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("opass"))
        .stdout(predicate::str::contains("password"));
}

#[test]
fn test_cli_version() {
    opass()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("opass"));
}

#[test]
fn test_cli_password_requires_url() {
    opass().arg("password").assert().failure();
}

#[test]
fn test_cli_unknown_command() {
    opass().arg("frobnicate").assert().failure();
}

#[test]
fn test_cli_config_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("custom.toml");

    opass()
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_cli_config_init_and_show() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    opass()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    opass()
        .args(["config", "show", "--timeout", "12", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("timeout = 12"))
        .stdout(predicate::str::contains("ws://127.0.0.1:6263/4"));
}

#[test]
fn test_cli_credentials_show_and_reset() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "");
    std::fs::write(
        dir.path().join("credentials.json"),
        r#"{"clientId": "client-abc", "sharedSecret": "supersecretvalue"}"#,
    )
    .unwrap();

    opass()
        .args(["credentials", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("client-abc"))
        .stdout(predicate::str::contains("supersecretvalue").not());

    opass()
        .args(["credentials", "reset", "--config"])
        .arg(&config)
        .assert()
        .success();
    assert!(!dir.path().join("credentials.json").exists());
}

#[test]
fn test_cli_password_companion_unreachable() {
    let dir = tempdir().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = write_config(
        dir.path(),
        &format!("address = \"ws://127.0.0.1:{}/4\"\n", port),
    );

    opass()
        .args(["password", "https://example.com", "--timeout", "2", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to get password"));

    // Credentials are generated before connecting
    assert!(dir.path().join("credentials.json").exists());
}

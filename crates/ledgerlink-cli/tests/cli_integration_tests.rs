//! CLI integration tests for ledgerlink
//!
//! Only commands that stay off the network and the OS keyring run here.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated in its own config directory
#[allow(deprecated)]
fn ledgerlink_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ledgerlink").unwrap();
    cmd.current_dir(config_dir.path());
    cmd.env("LEDGERLINK_CONFIG_DIR", config_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("tokens"))
        .stdout(predicate::str::contains("icp"));
}

#[test]
fn test_amount_encode() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["amount", "encode", "1.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("150000000 units"));
}

#[test]
fn test_amount_decode() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["amount", "decode", "150000000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.50000000"));
}

#[test]
fn test_amount_quiet_prints_units_only() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["--quiet", "amount", "encode", "0.00000001"])
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn test_amount_encode_rejects_garbage() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["amount", "encode", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid amount"));
}

#[test]
fn test_amount_json_output() {
    let temp_dir = TempDir::new().unwrap();

    let output = ledgerlink_cmd(&temp_dir)
        .args(["--format", "json", "amount", "encode", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["decimal"], "2.00000000");
    assert_eq!(value["units"], 200_000_000u64);
}

#[test]
fn test_config_path_uses_override() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_list_shows_defaults() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "session.idle_timeout_ms = 1800000",
        ))
        .stdout(predicate::str::contains("retry.mutation.max_attempts = 3"));
}

#[test]
fn test_config_set_then_get() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "set", "api.base_url", "https://tokens.example.com/api/"])
        .assert()
        .success();

    assert!(temp_dir.path().join("config.toml").exists());

    ledgerlink_cmd(&temp_dir)
        .args(["config", "get", "api.base_url"])
        .assert()
        .success()
        .stdout("https://tokens.example.com/api\n");
}

#[test]
fn test_config_set_provider_endpoint() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args([
            "config",
            "set",
            "session.providers.nfid.max_credential_lifetime_secs",
            "3600",
        ])
        .assert()
        .success();

    ledgerlink_cmd(&temp_dir)
        .args([
            "config",
            "get",
            "session.providers.nfid.max_credential_lifetime_secs",
        ])
        .assert()
        .success()
        .stdout("3600\n");
}

#[test]
fn test_config_rejects_invalid_values() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "set", "session.idle_timeout_ms", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be greater than 0"));

    ledgerlink_cmd(&temp_dir)
        .args(["config", "set", "api.base_url", "ftp://nope"])
        .assert()
        .failure();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_reset_restores_defaults() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "set", "api.timeout_secs", "5"])
        .assert()
        .success();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "reset"])
        .assert()
        .success();

    ledgerlink_cmd(&temp_dir)
        .args(["config", "get", "api.timeout_secs"])
        .assert()
        .success()
        .stdout("30\n");
}

#[test]
fn test_connect_rejects_unknown_provider() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("chain.json");
    std::fs::write(&file, "{}").unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["connect", "--provider", "metamask", "--import"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown identity provider"));
}

#[test]
fn test_connect_reports_missing_file() {
    let temp_dir = TempDir::new().unwrap();

    ledgerlink_cmd(&temp_dir)
        .args(["connect", "--import", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read delegation file"));
}

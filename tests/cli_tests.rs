mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use support::{valid_config_toml, write_temp_config};

#[test]
fn cli_prints_help() {
    Command::cargo_bin("marketwatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("collect"));
}

#[test]
fn collect_returns_nonzero_on_missing_config() {
    Command::cargo_bin("marketwatch")
        .unwrap()
        .args(["--config", "/nonexistent/marketwatch-config.toml", "collect", "--no-banner"])
        .assert()
        .failure();
}

#[test]
fn collect_returns_nonzero_on_empty_database_url() {
    let path = write_temp_config("[database]\nurl = \"\"\n");

    Command::cargo_bin("marketwatch")
        .unwrap()
        .args(["--config"])
        .arg(&path)
        .args(["collect", "--no-banner"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("database.url"));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn status_command_runs_and_prints_a_notice() {
    Command::cargo_bin("marketwatch")
        .unwrap()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("not yet implemented"));
}

#[test]
fn logs_command_runs_and_prints_a_notice() {
    Command::cargo_bin("marketwatch")
        .unwrap()
        .arg("logs")
        .assert()
        .success()
        .stdout(predicate::str::contains("not yet implemented"));
}

#[test]
fn collect_fails_cleanly_when_database_is_unreachable() {
    let path = write_temp_config(valid_config_toml());

    Command::cargo_bin("marketwatch")
        .unwrap()
        .args(["--config"])
        .arg(&path)
        .args(["collect", "--no-banner"])
        .assert()
        .failure();

    let _ = std::fs::remove_file(&path);
}

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn client_prints_its_version() {
    Command::cargo_bin("skv-client")
        .unwrap()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("skv-client"));
}

#[test]
fn server_prints_its_version() {
    Command::cargo_bin("skv-server")
        .unwrap()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("skv-server"));
}

#[test]
fn client_with_no_subcommand_fails() {
    Command::cargo_bin("skv-client").unwrap().assert().failure();
}

#[test]
fn client_rejects_an_invalid_address() {
    Command::cargo_bin("skv-client")
        .unwrap()
        .args(&["--addr", "not-an-address", "count", "--tkn", "1"])
        .assert()
        .failure();
}

#[test]
fn client_rejects_a_non_numeric_token() {
    Command::cargo_bin("skv-client")
        .unwrap()
        .args(&["--addr", "127.0.0.1:4000", "end", "--tkn", "not-a-token"])
        .assert()
        .failure();
}

#[test]
fn server_rejects_an_invalid_address() {
    Command::cargo_bin("skv-server")
        .unwrap()
        .args(&["--addr", "not-an-address"])
        .assert()
        .failure();
}

#[test]
fn server_rejects_a_zero_thread_pool() {
    Command::cargo_bin("skv-server")
        .unwrap()
        .args(&["--addr", "127.0.0.1:4009", "--threads", "0"])
        .assert()
        .failure();
}

#[test]
fn server_rejects_a_zero_sweep_interval() {
    Command::cargo_bin("skv-server")
        .unwrap()
        .args(&["--addr", "127.0.0.1:4009", "--sweep-interval", "0"])
        .assert()
        .failure();
}

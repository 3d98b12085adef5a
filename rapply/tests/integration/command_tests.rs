use std::process::{Command, Output};

use crate::common::{TestWorkspace, assert_contains, assert_path_exists, init_test_logging};

fn rapply(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rapply"))
        .args(args)
        .env_remove("RAPPLY_LOG")
        .env_remove("RAPPLY_SUDO_PASSWORD")
        .output()
        .expect("Failed to run rapply")
}

#[test]
fn test_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_includes_description");

    let output = rapply(&["--help"]);
    assert!(output.status.success(), "rapply --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_contains(&stdout, "Converge remote targets against a local policy archive");
    assert_contains(&stdout, "--no-install");
    assert_contains(&stdout, "--identity-file");
    crate::test_log!("TEST PASS: test_help_includes_description");
}

#[test]
fn test_missing_archive_is_unexpected_error() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_archive_is_unexpected_error");

    let ws = TestWorkspace::new();
    let missing = ws.dir.path().join("nope.tgz");
    let output = rapply(&[
        "web1",
        missing.to_str().unwrap(),
        "--config",
        ws.config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(32));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "does not exist");
    assert_path_exists(&ws.log_file);
    crate::test_log!("TEST PASS: test_missing_archive_is_unexpected_error");
}

#[test]
fn test_missing_explicit_config_is_rejected() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_explicit_config_is_rejected");

    let ws = TestWorkspace::new();
    let config = ws.dir.path().join("absent.toml");
    let output = rapply(&[
        "web1",
        ws.archive.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(32));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "loading configuration");
    crate::test_log!("TEST PASS: test_missing_explicit_config_is_rejected");
}

#[test]
fn test_invalid_target_port_is_rejected() {
    init_test_logging();
    crate::test_log!("TEST START: test_invalid_target_port_is_rejected");

    let ws = TestWorkspace::new();
    let output = rapply(&[
        "web1:notaport",
        ws.archive.to_str().unwrap(),
        "--config",
        ws.config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(32));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "invalid port");
    crate::test_log!("TEST PASS: test_invalid_target_port_is_rejected");
}

#[test]
fn test_unknown_protocol_is_a_usage_error() {
    init_test_logging();

    let ws = TestWorkspace::new();
    let output = rapply(&[
        "web1",
        ws.archive.to_str().unwrap(),
        "--protocol",
        "telnet",
    ]);

    // clap's own usage error status
    assert_eq!(output.status.code(), Some(2));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "unsupported protocol");
}

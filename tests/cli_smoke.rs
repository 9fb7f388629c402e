//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

fn project() -> TempDir {
    TempDir::new().expect("tempdir")
}

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("opencodespace");
    cmd.assert().code(2).stderr(contains("Usage"));
}

#[test]
fn list_providers_prints_builtin_providers() {
    let mut cmd = cargo_bin_cmd!("opencodespace");
    cmd.arg("list-providers");

    cmd.assert()
        .success()
        .stdout(contains("local"))
        .stdout(contains("remote"))
        .stdout(contains("requires flyctl"));
}

#[test]
fn status_without_configuration_reports_absent_and_writes_nothing() {
    let dir = project();
    let mut cmd = cargo_bin_cmd!("opencodespace");
    cmd.current_dir(dir.path()).args(["status", "."]);

    cmd.assert()
        .success()
        .stdout(contains("provider: local"))
        .stdout(contains("status:   absent"));
    assert!(!dir.path().join(".opencodespace").exists());
}

#[test]
fn deploy_with_missing_engine_exits_with_requirement_code() {
    let dir = project();
    let mut cmd = cargo_bin_cmd!("opencodespace");
    cmd.env("OPENCODESPACE_DOCKER_BIN", "/nonexistent/docker")
        .arg("deploy")
        .arg(dir.path());

    cmd.assert()
        .code(3)
        .stderr(contains("/nonexistent/docker"))
        .stderr(contains("OPENCODESPACE_DOCKER_BIN"));
    assert!(!dir.path().join(".opencodespace").exists());
}

#[test]
fn unknown_provider_exits_with_registry_code() {
    let dir = project();
    let mut cmd = cargo_bin_cmd!("opencodespace");
    cmd.args(["status", "--provider", "gcp"]).arg(dir.path());

    cmd.assert()
        .code(6)
        .stderr(contains("unknown provider 'gcp'"))
        .stderr(contains("local, remote"));
}

#[test]
fn remote_remove_without_terminal_is_declined() {
    let dir = project();
    let mut cmd = cargo_bin_cmd!("opencodespace");
    cmd.args(["remove", "--provider", "remote"])
        .arg(dir.path())
        .write_stdin("n\n");

    cmd.assert()
        .code(1)
        .stderr(contains("cancelled"));
}

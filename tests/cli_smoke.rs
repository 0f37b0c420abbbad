//! Behavioural smoke tests for the CLI entrypoint, driven against the
//! in-memory cloud selected through `SIMPLE_STRESS_FAKE_CLOUD`.

use std::io::Write;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::{NamedTempFile, TempDir};

const FAST: [&str; 5] = ["--interval", "1", "--console-interval", "1", "--no-volume"];

const CREDENTIAL_VARS: [&str; 8] = [
    "OS_AUTH_URL",
    "OS_USERNAME",
    "OS_PASSWORD",
    "OS_PROJECT_NAME",
    "OS_USER_DOMAIN_NAME",
    "OS_PROJECT_DOMAIN_NAME",
    "OS_REGION_NAME",
    "OS_INTERFACE",
];

/// Command talking to a real cloud, isolated from the caller's credentials
/// and configuration files.
fn openstack_cmd(home: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.env_remove("SIMPLE_STRESS_FAKE_CLOUD");
    cmd.env_remove("SIMPLE_STRESS_CONFIG_PATH");
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home.path());
    cmd.env("XDG_CONFIG_HOME", home.path());
    cmd.current_dir(home.path());
    cmd
}

#[test]
fn cli_help_lists_stress_options() {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("--parallel"))
        .stdout(contains("--no-cleanup"));
}

#[test]
fn cli_rejects_zero_parallelism_as_usage_error() {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.args(["--parallel", "0"]);
    cmd.assert().code(2);
}

#[test]
fn cli_runs_against_healthy_fake_cloud() {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.env("SIMPLE_STRESS_FAKE_CLOUD", "healthy");
    cmd.args(FAST);
    cmd.args(["--number", "2", "--parallel", "2"]);

    cmd.assert()
        .success()
        .stdout(contains("2 succeeded, 0 failed, 0 not attempted"));
}

#[test]
fn cli_counts_failed_instances_without_failing_the_run() {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.env("SIMPLE_STRESS_FAKE_CLOUD", "failing-servers");
    cmd.args(FAST);

    cmd.assert()
        .success()
        .stdout(contains("0 succeeded, 1 failed"));
}

#[test]
fn cli_fails_when_flavor_cannot_be_resolved() {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.env("SIMPLE_STRESS_FAKE_CLOUD", "missing-flavor");
    cmd.args(FAST);

    cmd.assert().failure().code(1).stderr(contains("SCS-1V-2"));
}

#[test]
fn cli_rejects_unknown_fake_cloud_scenario() {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.env("SIMPLE_STRESS_FAKE_CLOUD", "thunderstorm");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("scenario 'thunderstorm'"));
}

#[test]
fn cli_reads_user_data_from_file() {
    let mut file = NamedTempFile::new().expect("create user data file");
    writeln!(file, "#cloud-config\nfinal_message: SIMPLE_STRESS_OK")
        .expect("write user data file");

    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.env("SIMPLE_STRESS_FAKE_CLOUD", "healthy");
    cmd.args(FAST);
    cmd.arg("--user-data-file").arg(file.path());

    cmd.assert().success().stdout(contains("1 succeeded"));
}

#[test]
fn cli_reports_unreadable_user_data_file() {
    let mut cmd = cargo_bin_cmd!("simple-stress");
    cmd.env("SIMPLE_STRESS_FAKE_CLOUD", "healthy");
    cmd.args(["--user-data-file", "/nonexistent/simple-stress/user-data"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("user data error"));
}

#[test]
fn cli_reports_missing_credentials_as_configuration_error() {
    let home = TempDir::new().expect("create home directory");
    let mut cmd = openstack_cmd(&home);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("configuration error"));
}

#[test]
fn cli_validates_credentials_loaded_from_environment() {
    let home = TempDir::new().expect("create home directory");
    let mut cmd = openstack_cmd(&home);
    cmd.env("OS_AUTH_URL", "http://127.0.0.1:9/v3");
    cmd.env("OS_USERNAME", "stress");
    cmd.env("OS_PASSWORD", "secret");
    cmd.env("OS_PROJECT_NAME", "load");
    cmd.env("OS_INTERFACE", "private");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("OS_INTERFACE"));
}

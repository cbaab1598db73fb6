//! Behavioural smoke tests for the CLI entrypoint.

#[path = "common/scratch.rs"]
mod scratch;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

use scratch::Scratch;

fn hostvol(scratch: &Scratch) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hostvol");
    cmd.current_dir(&scratch.root)
        .env("HOSTVOL_PID_FILE", scratch.pid_file().as_str())
        .env("HOSTVOL_REQUIRE_ROOT", "false")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("hostvol");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn status_reports_stopped_without_pid_file() {
    let scratch = Scratch::new();
    hostvol(&scratch)
        .arg("status")
        .assert()
        .success()
        .stdout("hostvol is stopped\n");
}

#[test]
fn status_reports_recorded_pid() {
    let scratch = Scratch::new();
    let path = scratch.pid_file();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("create run dir: {err}"));
    }
    std::fs::write(&path, "4242\n").unwrap_or_else(|err| panic!("write pid: {err}"));

    hostvol(&scratch)
        .arg("status")
        .assert()
        .success()
        .stdout("hostvol is running at PID 4242\n");
}

#[test]
fn stop_without_pid_file_fails() {
    let scratch = Scratch::new();
    hostvol(&scratch)
        .arg("stop")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("hostvol is already stopped"));
}

#[test]
fn foreground_start_fails_on_invalid_backend_config() {
    let scratch = Scratch::new();
    hostvol(&scratch)
        .args(["start", "--foreground"])
        .env("HOSTVOL_OS_DRIVER", "plan9")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("service initialisation failed"))
        .stderr(predicate::str::contains("plan9"));
    assert!(!scratch.pid_file().exists());
}

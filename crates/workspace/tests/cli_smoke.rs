//! CLI surface smoke tests that run without a Docker daemon.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn workspace_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("workspace").unwrap();
    cmd.env("HOME", home.path());
    cmd
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().unwrap();
    workspace_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("proxy"))
        .stdout(predicate::str::contains("buildkit"));
}

#[test]
fn no_subcommand_prints_hint() {
    let home = TempDir::new().unwrap();
    workspace_cmd(&home)
        .assert()
        .success()
        .stdout(predicate::str::contains("workspace --help"));
}

#[test]
fn init_creates_config_and_refuses_overwrite() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    workspace_cmd(&home)
        .current_dir(project.path())
        .args(["init", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains(".workspace.yml"));
    assert!(project.path().join(".workspace.yml").is_file());

    workspace_cmd(&home)
        .current_dir(project.path())
        .args(["init", "demo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    workspace_cmd(&home)
        .current_dir(project.path())
        .args(["init", "demo", "-f"])
        .assert()
        .success();
}

#[test]
fn list_with_empty_state() {
    let home = TempDir::new().unwrap();
    workspace_cmd(&home)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No workspaces recorded"));
}

#[test]
fn first_use_creates_user_config_skeleton() {
    let home = TempDir::new().unwrap();
    workspace_cmd(&home).arg("list").assert().success();

    assert!(home.path().join(".workspaces/config.yml").is_file());
    assert!(home.path().join(".workspaces/userscripts").is_dir());
}

#[test]
fn proxy_requires_known_workspace() {
    let home = TempDir::new().unwrap();
    workspace_cmd(&home)
        .args(["proxy", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No state recorded"));
}

#[test]
fn config_requires_project_file() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    workspace_cmd(&home)
        .current_dir(project.path())
        .args(["config", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(".workspace.yml"));
}

#[test]
fn destroy_without_tty_aborts_without_force() {
    let home = TempDir::new().unwrap();
    workspace_cmd(&home)
        .args(["destroy", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Aborted"));
}

#[test]
fn buildkit_flags_are_mutually_exclusive() {
    let home = TempDir::new().unwrap();
    workspace_cmd(&home)
        .args(["buildkit", "--stop", "--clean"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at most one"));
}

#[test]
fn bad_project_config_is_reported() {
    let home = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join(".workspace.yml"),
        "forwards: {not: a list}\n",
    )
    .unwrap();

    workspace_cmd(&home)
        .current_dir(project.path())
        .args(["config", "demo"])
        .assert()
        .failure();
}

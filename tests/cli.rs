//! Integration tests: run the fwpack binary in a scratch dir and check exit codes and output.

use std::path::Path;
use std::process::{Command, Output};

fn fwpack(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fwpack"));
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("NO_COLOR", "1")
        .env("FWPACK_SERVER_URL", "http://127.0.0.1:9")
        .env_remove("FWPACK_PACKAGE_FILE")
        .env_remove("FWPACK_CHUNK_SIZE");
    cmd
}

fn run(dir: &Path, args: &[&str]) -> Output {
    fwpack(dir).args(args).output().unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn manifest(dir: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(dir.join(".fwpack")).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn test_help() {
    let td = tempfile::tempdir().unwrap();
    let out = run(td.path(), &["--help"]);
    assert!(out.status.success(), "fwpack --help should succeed");
    let text = stdout(&out);
    assert!(text.contains("init"));
    assert!(text.contains("push"));
    assert!(text.contains("pull"));
}

#[test]
fn test_version() {
    let td = tempfile::tempdir().unwrap();
    let out = run(td.path(), &["--version"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("fwpack"));
}

#[test]
fn test_init_twice_refuses_to_overwrite() {
    let td = tempfile::tempdir().unwrap();
    assert!(run(td.path(), &["init", "--product", "P1234"]).status.success());
    let out = run(td.path(), &["init", "--product", "P9999"]);
    assert_eq!(out.status.code(), Some(5));
    assert_eq!(manifest(td.path())["product"], "P1234");
}

#[test]
fn test_show_without_package_file_is_not_found() {
    let td = tempfile::tempdir().unwrap();
    let out = run(td.path(), &["show"]);
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn test_edit_workflow_active_inactive() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path();
    std::fs::write(dir.join("rootfs.img"), b"rootfs contents").unwrap();

    assert!(run(dir, &["init", "--product", "P1234", "--mode", "active-inactive"]).status.success());
    assert!(run(dir, &["new", "2.0"]).status.success());
    let out = run(
        dir,
        &["add", "rootfs.img", "--mode", "raw", "-o", "target-device=/dev/mmcblk0p2"],
    );
    assert!(out.status.success(), "add failed: {}", String::from_utf8_lossy(&out.stderr));

    // per-set option without a set is a usage error, and nothing is written
    let out = run(dir, &["edit", "0", "target-device", "/dev/mmcblk0p3"]);
    assert_eq!(out.status.code(), Some(2));
    let out = run(
        dir,
        &["edit", "0", "target-device", "/dev/mmcblk0p3", "--installation-set", "1"],
    );
    assert!(out.status.success());

    // shared option with a set is refused
    let out = run(dir, &["edit", "0", "count", "4", "--installation-set", "0"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(run(dir, &["edit", "0", "count", "4"]).status.success());

    let m = manifest(dir);
    assert_eq!(m["version"], "2.0");
    assert_eq!(m["objects"][0][0]["options"]["target-device"], "/dev/mmcblk0p2");
    assert_eq!(m["objects"][1][0]["options"]["target-device"], "/dev/mmcblk0p3");
    assert_eq!(m["objects"][0][0]["options"]["count"], 4);
    assert_eq!(m["objects"][1][0]["options"]["count"], 4);

    let text = stdout(&run(dir, &["show"]));
    assert!(text.contains("Installation set 1"));
    assert!(text.contains("/dev/mmcblk0p3"));
}

#[test]
fn test_invalid_option_and_value_exit_codes() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path();
    std::fs::write(dir.join("fw.bin"), b"fw").unwrap();
    assert!(run(dir, &["init", "--product", "P1"]).status.success());

    let out = run(dir, &["add", "fw.bin", "--mode", "flash", "-o", "volume=data"]);
    assert_eq!(out.status.code(), Some(6));
    let out = run(dir, &["add", "fw.bin", "--mode", "raw", "-o", "seek=-3"]);
    assert_eq!(out.status.code(), Some(6));
    assert_eq!(manifest(dir)["objects"][0].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_remove_unknown_object_is_not_found() {
    let td = tempfile::tempdir().unwrap();
    assert!(run(td.path(), &["init", "--product", "P1"]).status.success());
    let out = run(td.path(), &["remove", "3"]);
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn test_mode_switch_only_while_empty() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path();
    std::fs::write(dir.join("fw.bin"), b"fw").unwrap();
    assert!(run(dir, &["init", "--product", "P1"]).status.success());
    assert!(run(dir, &["mode", "active-inactive"]).status.success());
    assert_eq!(manifest(dir)["objects"].as_array().map(Vec::len), Some(2));

    assert!(run(dir, &["add", "fw.bin", "-m", "raw"]).status.success());
    let out = run(dir, &["mode", "single"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_export_copies_manifest() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path();
    assert!(run(dir, &["init", "--product", "P1"]).status.success());
    assert!(run(dir, &["active-backup-backend", "grub"]).status.success());
    assert!(run(dir, &["export", "copy.json"]).status.success());
    let copy: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("copy.json")).unwrap()).unwrap();
    assert_eq!(copy, manifest(dir));
    assert_eq!(copy["active-backup-backend"], "grub");
}

#[test]
fn test_pull_over_local_objects_refused_before_network() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path();
    std::fs::write(dir.join("fw.bin"), b"fw").unwrap();
    assert!(run(dir, &["init", "--product", "P1"]).status.success());
    assert!(run(dir, &["add", "fw.bin", "-m", "raw"]).status.success());
    // usage (2), not connection (3): the server is never contacted
    let out = run(dir, &["pull", "abc", "--metadata"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_pull_requires_full_or_metadata() {
    let td = tempfile::tempdir().unwrap();
    assert!(run(td.path(), &["init", "--product", "P1"]).status.success());
    let out = run(td.path(), &["pull", "abc"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_push_unreachable_server_is_connection_error() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path();
    std::fs::write(dir.join("fw.bin"), b"fw").unwrap();
    std::fs::write(dir.join(".fwpackrc"), r#"{"retries": 0, "timeoutMs": 2000}"#).unwrap();
    assert!(run(dir, &["init", "--product", "P1"]).status.success());
    assert!(run(dir, &["add", "fw.bin", "-m", "raw"]).status.success());
    let out = run(dir, &["push", "--quiet"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(manifest(dir).get("uid").map_or(true, |v| v.is_null()));
}

#[test]
fn test_push_missing_artifact_is_file_access_error() {
    let td = tempfile::tempdir().unwrap();
    let dir = td.path();
    std::fs::write(dir.join("fw.bin"), b"fw").unwrap();
    assert!(run(dir, &["init", "--product", "P1"]).status.success());
    assert!(run(dir, &["add", "fw.bin", "-m", "raw"]).status.success());
    std::fs::remove_file(dir.join("fw.bin")).unwrap();
    let out = run(dir, &["push", "--quiet"]);
    assert_eq!(out.status.code(), Some(7));
}

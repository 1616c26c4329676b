//! Integration tests for the `watchsync` binary.
//!
//! HOME points at a scratch directory so a developer's own ~/.watchme.json
//! never leaks into the run.

mod common;

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn watchsync_bin() -> String {
    env!("CARGO_BIN_EXE_watchsync").to_string()
}

fn run(home: &Path, args: &[&str]) -> Output {
    Command::new(watchsync_bin())
        .args(args)
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// =============================================================================
// --init
// =============================================================================

#[test]
fn test_init_writes_starter_config() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let output = run(home.path(), &["--init", "-C", work.path().to_str().unwrap()]);
    assert!(output.status.success(), "init failed: {}", stderr(&output));

    let body = fs::read_to_string(work.path().join(".watchme.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json["profiles"]["profileA"].is_object());
    assert!(json["ignore_regexes"].is_array());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    fs::write(work.path().join(".watchme.json"), "{\"host\": \"keep\"}").unwrap();

    let output = run(home.path(), &["-i", "-C", work.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("already exists"));
    assert_eq!(
        fs::read_to_string(work.path().join(".watchme.json")).unwrap(),
        "{\"host\": \"keep\"}"
    );
}

// =============================================================================
// Configuration errors
// =============================================================================

#[test]
fn test_unknown_profile_fails() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    fs::write(
        work.path().join(".watchme.json"),
        r#"{"host": "h", "user": "u", "remote_path": "/r"}"#,
    )
    .unwrap();

    let output = run(home.path(), &["-u", "-p", "nope", "-C", work.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("'nope' is not defined"));
}

#[test]
fn test_invalid_json_fails() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    fs::write(work.path().join(".watchme.json"), "{ not json").unwrap();

    let output = run(home.path(), &["-C", work.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains(".watchme.json"));
}

#[test]
fn test_upload_and_download_are_exclusive() {
    let home = TempDir::new().unwrap();
    let output = run(home.path(), &["-u", "-d"]);
    assert!(!output.status.success());
}

// =============================================================================
// Bulk operations
// =============================================================================

#[cfg(unix)]
#[test]
fn test_upload_with_two_profiles_touches_nothing() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = TempDir::new().unwrap();
    let marker = bin.path().join("ssh-ran");
    let ssh = common::script(
        bin.path(),
        "ssh",
        &format!("touch '{}'\nexit 0", marker.display()),
    );
    let rsync = common::fake_rsync(bin.path(), bin.path(), 0);

    fs::write(
        work.path().join(".watchme.json"),
        serde_json::json!({
            "host": "h", "user": "u", "remote_path": "/r",
            "ssh_command": ssh, "rsync_command": rsync,
            "profiles": { "a": {}, "b": {} }
        })
        .to_string(),
    )
    .unwrap();
    fs::write(work.path().join("a.txt"), "a").unwrap();

    let output = run(home.path(), &["-u", "-p", "a,b", "-C", work.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("single profile"));
    assert!(!marker.exists(), "no connection may be attempted");
    assert!(!bin.path().join("args.log").exists(), "no transfer may run");
}

/// Project config pointing at fake ssh/rsync under `bin`.
#[cfg(unix)]
fn write_upload_project(work: &Path, bin: &Path) {
    let ssh = common::script(bin, "ssh", "exit 0");
    let rsync = common::fake_rsync(bin, bin, 0);
    fs::write(
        work.join(".watchme.json"),
        serde_json::json!({
            "host": "build", "user": "alice", "remote_path": "/srv/app",
            "ssh_command": ssh, "rsync_command": rsync,
            "control_path": bin.join("cs-%h-%r"),
        })
        .to_string(),
    )
    .unwrap();
    fs::write(work.join("a.txt"), "a").unwrap();
}

#[cfg(unix)]
#[test]
fn test_upload_end_to_end() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = TempDir::new().unwrap();
    write_upload_project(work.path(), bin.path());
    fs::create_dir(work.path().join("node_modules")).unwrap();
    fs::write(work.path().join("node_modules/x.js"), "x").unwrap();

    let output = Command::new(watchsync_bin())
        .args(["--upload", "-C", work.path().to_str().unwrap()])
        .env("HOME", home.path())
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(output.status.success(), "upload failed: {}", stderr(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("upload complete: 1 of"));

    let manifest = common::read_or_empty(&bin.path().join("manifest.log"));
    assert_eq!(manifest, "a.txt\n");
    let args = common::read_or_empty(&bin.path().join("args.log"));
    assert!(args.contains("alice@build:/srv/app/"));
    assert!(!work.path().join(".watchme_upload_list").exists());
}

#[cfg(unix)]
#[test]
fn test_upload_exits_while_stdin_stays_open() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let bin = TempDir::new().unwrap();
    write_upload_project(work.path(), bin.path());

    // An interactive terminal: input open, nothing typed.
    let mut child = Command::new(watchsync_bin())
        .args(["--upload", "-C", work.path().to_str().unwrap()])
        .env("HOME", home.path())
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let _input = child.stdin.take();

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            break None;
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    let status = status.expect("upload did not exit with stdin still open");
    assert!(status.success());
    assert_eq!(common::read_or_empty(&bin.path().join("manifest.log")), "a.txt\n");
}

//! Fake `ssh` / `rsync` executables for driving the real command builders.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// rsync stand-in: records its argv, and the contents of any
/// `--files-from` manifest, into `log_dir`.
#[cfg(unix)]
pub fn fake_rsync(dir: &Path, log_dir: &Path, exit: i32) -> PathBuf {
    script(
        dir,
        "rsync",
        &format!(
            r#"echo "$@" >> '{log}/args.log'
for a in "$@"; do
  case "$a" in
    --files-from=*) cat "${{a#--files-from=}}" >> '{log}/manifest.log' ;;
  esac
done
exit {exit}"#,
            log = log_dir.display(),
            exit = exit
        ),
    )
}

pub fn read_or_empty(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

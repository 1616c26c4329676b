//! rsync over the profile's ssh control socket.

use super::Transport;
use crate::config::Profile;
use crate::error::{Result, SyncError, TransferFailure};
use crate::ssh::{ControlChannel, SSH_CONNECTION_FAILURE};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

/// Substrings ssh prints when the shared connection itself is unusable.
const STALE_SESSION_MARKERS: &[&str] = &[
    "Control socket",
    "Permission denied (publickey",
    "Permission denied (password",
    "Permission denied (keyboard-interactive",
    "Host key verification failed",
    "Connection closed by",
];

pub struct RsyncTransport {
    channel: ControlChannel,
    rsync_command: String,
    local_root: PathBuf,
    local_root_arg: String,
    remote_root: String,
    remote_spec: String,
}

impl RsyncTransport {
    pub fn new(profile: &Profile, channel: ControlChannel) -> Self {
        Self {
            channel,
            rsync_command: profile.ssh.rsync_command.clone(),
            local_root: profile.local_path.clone(),
            local_root_arg: profile.local_root_arg(),
            remote_root: profile.remote_path.clone(),
            remote_spec: profile.remote_spec(),
        }
    }

    /// `rsync -avPR` for one relative path, run from the local root so `-R`
    /// recreates the same relative layout remotely.
    pub fn file_command(&self, relative: &str) -> Command {
        let mut cmd = Command::new(&self.rsync_command);
        cmd.arg("-avPR")
            .arg("-e")
            .arg(self.channel.rsync_shell())
            // Watched names may start with a dash.
            .arg("--")
            .arg(relative)
            .arg(&self.remote_spec)
            .current_dir(&self.local_root)
            .kill_on_drop(true);
        cmd
    }

    /// Batched `rsync -avP --files-from` between `source` and `dest`.
    pub fn manifest_command(&self, manifest: &Path, source: &str, dest: &str) -> Command {
        let mut cmd = Command::new(&self.rsync_command);
        cmd.arg("-avP")
            .arg(format!("--files-from={}", manifest.display()))
            .arg("-e")
            .arg(self.channel.rsync_shell())
            .arg(source)
            .arg(dest)
            .kill_on_drop(true);
        cmd
    }

    async fn run_manifest(&self, manifest: &Path, source: &str, dest: &str) -> Result<()> {
        let output = self
            .manifest_command(manifest, source, dest)
            .output()
            .await?;
        check_output(&output).map_err(|failure| match failure {
            TransferFailure::Auth(reason) => SyncError::auth(self.channel.destination(), reason),
            TransferFailure::Transfer(reason) => SyncError::Transfer {
                path: manifest.display().to_string(),
                reason,
            },
        })
    }
}

#[async_trait]
impl Transport for RsyncTransport {
    async fn push_file(&self, relative: &str) -> std::result::Result<(), TransferFailure> {
        let output = self
            .file_command(relative)
            .output()
            .await
            .map_err(|e| TransferFailure::Transfer(format!("failed to spawn rsync: {}", e)))?;
        check_output(&output)
    }

    async fn push_manifest(&self, manifest: &Path) -> Result<()> {
        self.run_manifest(manifest, &self.local_root_arg, &self.remote_spec)
            .await
    }

    async fn pull_manifest(&self, manifest: &Path) -> Result<()> {
        self.run_manifest(manifest, &self.remote_spec, &self.local_root_arg)
            .await
    }

    async fn list_remote_files(&self) -> Result<Vec<String>> {
        let script = format!("cd {} && find . -type f", remote_quote(&self.remote_root));
        let mut cmd = self.channel.remote_command([script]);
        cmd.kill_on_drop(true);
        let output = cmd.output().await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || !stderr.trim().is_empty() {
            return Err(SyncError::Enumeration {
                root: self.remote_spec.clone(),
                reason: describe(&output, &stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| line.strip_prefix("./"))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Map a finished rsync/ssh invocation to success or a classified failure.
/// A zero exit that still wrote diagnostics counts as a failure.
pub fn check_output(output: &Output) -> std::result::Result<(), TransferFailure> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() && stderr.trim().is_empty() {
        tracing::trace!(stdout = %String::from_utf8_lossy(&output.stdout), "rsync ok");
        return Ok(());
    }
    Err(classify_failure(output.status.code(), &stderr))
}

/// A dead channel is reported as [`TransferFailure::Auth`]; everything else
/// (missing remote directory, permissions) is local to the file.
pub fn classify_failure(code: Option<i32>, stderr: &str) -> TransferFailure {
    let reason = if stderr.trim().is_empty() {
        match code {
            Some(c) => format!("exit status {}", c),
            None => "terminated by signal".to_string(),
        }
    } else {
        stderr.trim().to_string()
    };

    if code == Some(SSH_CONNECTION_FAILURE)
        || STALE_SESSION_MARKERS.iter().any(|m| stderr.contains(m))
    {
        TransferFailure::Auth(reason)
    } else {
        TransferFailure::Transfer(reason)
    }
}

fn describe(output: &Output, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        format!("exit {}", output.status)
    } else {
        stderr.trim().to_string()
    }
}

/// Quote a path for the remote shell, leaving a leading `~/` expandable.
fn remote_quote(path: &str) -> String {
    let quote = |s: &str| format!("'{}'", s.replace('\'', "'\\''"));
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~/".to_string(),
        Some(rest) => format!("~/{}", quote(rest)),
        None => quote(path),
    }
}

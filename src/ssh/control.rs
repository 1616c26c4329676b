//! The control channel token and the ssh command lines built from it.
//!
//! One master connection per profile lives behind an OpenSSH ControlPath
//! socket. Every later command (keepalive, remote listing, rsync) names the
//! same socket with `-S` and so rides the already-authenticated connection.

use crate::config::Profile;
use crate::path::expand_tilde;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Opaque identity of one reusable authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlChannel {
    control_path: PathBuf,
    destination: String,
    port: u16,
    ssh_command: String,
}

impl ControlChannel {
    pub fn for_profile(profile: &Profile) -> Self {
        Self {
            control_path: expand_tilde(&profile.ssh.control_path),
            destination: profile.destination(),
            port: profile.ssh.port,
            ssh_command: profile.ssh.ssh_command.clone(),
        }
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Master connection: forces a tty so interactive prompts work, and
    /// keeps the socket alive for `persist` after the last client leaves.
    pub fn master_command(&self, persist: Duration, greeting: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_command);
        cmd.arg("-A").arg("-tt");
        if self.port != 22 {
            cmd.arg("-p").arg(self.port.to_string());
        }
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg("ControlMaster=auto")
            .arg("-o")
            .arg(format!("ControlPersist={}", persist.as_secs()));
        cmd.arg(&self.destination);
        cmd.arg("echo").arg(greeting);
        cmd
    }

    /// One-shot remote command over the existing master.
    ///
    /// `BatchMode` keeps a vanished master from turning into a fresh
    /// interactive login; the command fails with ssh's exit status 255
    /// instead.
    pub fn remote_command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.ssh_command);
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-S")
            .arg(&self.control_path)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(&self.destination);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Remote shell for `rsync -e`, reusing the master socket.
    pub fn rsync_shell(&self) -> String {
        format!(
            "{} -p {} -S {} -o BatchMode=yes",
            self.ssh_command,
            self.port,
            shell_quote(&self.control_path.to_string_lossy())
        )
    }
}

/// Quote for rsync's `-e` splitter, which honours single quotes.
fn shell_quote(s: &str) -> String {
    if s.chars().any(char::is_whitespace) {
        format!("'{}'", s.replace('\'', "'\\''"))
    } else {
        s.to_string()
    }
}

/// ssh reserves exit status 255 for its own failures (connection refused,
/// dead control socket, rejected key). Anything else came from the remote
/// command.
pub const SSH_CONNECTION_FAILURE: i32 = 255;

//! Authenticated master connection for one profile, plus its keepalive.

use super::control::ControlChannel;
use super::relay::CredentialRelay;
use crate::config::Profile;
use crate::error::{Result, SyncError};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Lifecycle of a profile's control connection.
///
/// `Unauthenticated -> Authenticating -> Active`, or
/// `Authenticating -> Failed`. A new attempt may start from any state except
/// `Authenticating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Active,
    Failed,
}

/// Owns the control connection for one profile.
#[derive(Debug)]
pub struct RemoteSession {
    channel: ControlChannel,
    host: String,
    control_persist: Duration,
    state: Mutex<SessionState>,
}

impl RemoteSession {
    pub fn new(profile: &Profile) -> Self {
        Self {
            channel: ControlChannel::for_profile(profile),
            host: profile.host.clone(),
            control_persist: profile.ssh.control_persist,
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// The channel token, only while the session is active.
    pub fn token(&self) -> Option<ControlChannel> {
        match self.state() {
            SessionState::Active => Some(self.channel.clone()),
            _ => None,
        }
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    /// One fifth of the idle-close window.
    pub fn keepalive_period(&self) -> Duration {
        self.control_persist / 5
    }

    /// Start the master connection and wait for it to come up.
    ///
    /// # Panics
    ///
    /// If an attempt on this session is already in flight. Two concurrent
    /// attempts would fight over the operator's input, which is a bug in the
    /// caller, not a condition to recover from.
    pub async fn authenticate(&self, relay: &mut CredentialRelay) -> Result<ControlChannel> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            assert!(
                *state != SessionState::Authenticating,
                "authentication for {} started while another attempt is in flight",
                self.channel.destination()
            );
            *state = SessionState::Authenticating;
        }

        tracing::info!(destination = %self.channel.destination(), "starting master connection...");
        match self.run_master(relay).await {
            Ok(()) => {
                self.set_state(SessionState::Active);
                tracing::info!(
                    destination = %self.channel.destination(),
                    control_path = %self.channel.control_path().display(),
                    "authenticated"
                );
                Ok(self.channel.clone())
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn run_master(&self, relay: &mut CredentialRelay) -> Result<()> {
        let greeting = format!("{} authenticate ok", self.host);
        let mut cmd = self.channel.master_command(self.control_persist, &greeting);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SyncError::auth(
                self.channel.destination(),
                format!("failed to spawn ssh: {}", e),
            )
        })?;

        let mut input = child.stdin.take();
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                line = relay.next_line(), if input.is_some() => {
                    if let Some(pipe) = input.take() {
                        CredentialRelay::relay_once(line, pipe).await;
                    }
                }
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(SyncError::auth(
                self.channel.destination(),
                format!("ssh exited with {}", status),
            ))
        }
    }

    /// Run a no-op over the existing channel. Returns whether it succeeded.
    pub async fn ping(&self) -> bool {
        let mut cmd = self.channel.remote_command(["echo", "keep alive"]);
        cmd.stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);
        match cmd.status().await {
            Ok(status) if status.success() => {
                tracing::debug!(target: "watchsync::keepalive", destination = %self.channel.destination(), "keep alive ok");
                true
            }
            Ok(status) => {
                tracing::warn!(target: "watchsync::keepalive", destination = %self.channel.destination(), %status, "keep alive failed");
                false
            }
            Err(e) => {
                tracing::warn!(target: "watchsync::keepalive", destination = %self.channel.destination(), error = %e, "keep alive failed to spawn");
                false
            }
        }
    }

    /// Ping on every keepalive period until the returned guard is dropped.
    pub fn spawn_keepalive(self: &Arc<Self>) -> KeepAlive {
        let session = Arc::clone(self);
        let period = self.keepalive_period();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                session.ping().await;
            }
        });
        KeepAlive { handle }
    }
}

/// Stops the keepalive task when dropped.
#[derive(Debug)]
pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

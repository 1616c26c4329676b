//! Per-profile watch loop and the supervisor that runs every profile.
//!
//! ```text
//! run_profiles
//!   ├─ authenticate profile 1, 2, ... one at a time (shared terminal input)
//!   └─ JoinSet
//!        ├─ supervise(profile 1): watch -> subscribe -> dispatch ... restart?
//!        └─ supervise(profile 2): ...
//! ```
//!
//! A profile that fails is restarted from a fresh authentication, up to
//! [`RestartPolicy::max_restarts`] times. Other profiles are never affected.

use super::dispatcher::Dispatcher;
use crate::config::{Profile, WatcherKind};
use crate::error::{Result, SyncError};
use crate::ssh::{ControlChannel, CredentialRelay, RemoteSession};
use crate::transport::{RsyncTransport, Transport};
use crate::watch::{ChangeService, Watchman};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::Instrument;

/// The operator's input stream, shared by every profile but used by one
/// authentication at a time.
pub type SharedRelay = Arc<Mutex<CredentialRelay>>;

/// Bounded exponential backoff between profile restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    pub fn never() -> Self {
        Self {
            max_restarts: 0,
            ..Default::default()
        }
    }

    /// Delay before restart number `restart` (1-based).
    pub fn delay_for(&self, restart: u32) -> Duration {
        let factor = 2u32.saturating_pow(restart.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// One profile's session, transport and change feed.
pub struct ProfileRunner {
    profile: Arc<Profile>,
    session: Arc<RemoteSession>,
    relay: SharedRelay,
}

impl ProfileRunner {
    pub fn new(profile: Profile, relay: SharedRelay) -> Self {
        let session = Arc::new(RemoteSession::new(&profile));
        Self {
            profile: Arc::new(profile),
            session,
            relay,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Bring the control connection up, holding the shared input for the
    /// whole attempt.
    pub async fn authenticate(&self) -> Result<ControlChannel> {
        let mut relay = self.relay.lock().await;
        self.session.authenticate(&mut relay).await
    }

    /// Watch the local root and transfer changes until something fails.
    /// Keepalive pings run for exactly as long as this future.
    pub async fn watch(&self, channel: ControlChannel) -> Result<()> {
        let _keepalive = self.session.spawn_keepalive();
        let transport = Arc::new(RsyncTransport::new(&self.profile, channel));
        let dispatcher = Dispatcher::new(Arc::clone(&self.profile), transport);
        let root = &self.profile.local_path;

        match self.profile.watcher {
            WatcherKind::Watchman => {
                let service = Watchman::new(self.profile.watchman_command.clone());
                feed(&service, root, &dispatcher).await
            }
            #[cfg(feature = "watch")]
            WatcherKind::Notify => feed(&crate::watch::NotifyService, root, &dispatcher).await,
            #[cfg(not(feature = "watch"))]
            WatcherKind::Notify => Err(SyncError::Config(
                "this build does not include the notify watcher".into(),
            )),
        }
    }
}

async fn feed<S, T>(service: &S, root: &Path, dispatcher: &Dispatcher<T>) -> Result<()>
where
    S: ChangeService,
    T: Transport + 'static,
{
    let handle = service.watch(root).await?;
    let subscription = service.subscribe(handle).await?;
    dispatcher.run(subscription).await
}

/// Why a profile stopped for good.
#[derive(Debug)]
pub struct ProfileExit {
    pub name: String,
    pub error: SyncError,
}

/// Run every profile until each has stopped.
///
/// Initial authentication is sequential so prompts appear one profile at a
/// time; a profile that cannot authenticate is reported and skipped.
pub async fn run_profiles(
    profiles: Vec<Profile>,
    relay: SharedRelay,
    policy: RestartPolicy,
) -> Vec<ProfileExit> {
    let mut exits = Vec::new();
    let mut tasks = JoinSet::new();

    for profile in profiles {
        let name = profile.name.clone();
        let span = tracing::info_span!("profile", name = %name);
        let runner = ProfileRunner::new(profile, Arc::clone(&relay));

        match runner.authenticate().instrument(span.clone()).await {
            Ok(channel) => {
                let policy = policy.clone();
                tasks.spawn(
                    async move {
                        let error = supervise(&runner, channel, &policy).await;
                        ProfileExit {
                            name: runner.profile().name.clone(),
                            error,
                        }
                    }
                    .instrument(span),
                );
            }
            Err(error) => {
                tracing::error!(target: "watchsync::profile", profile = %name, "profile aborted: {}", error);
                exits.push(ProfileExit { name, error });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(exit) => exits.push(exit),
            Err(e) => tracing::error!(target: "watchsync::profile", "profile task failed: {}", e),
        }
    }
    exits
}

/// Drive one profile, restarting it while the policy allows. Returns the
/// error that finally stopped it.
async fn supervise(runner: &ProfileRunner, first: ControlChannel, policy: &RestartPolicy) -> SyncError {
    let name = &runner.profile().name;
    let mut channel = Some(first);
    let mut restarts = 0;

    loop {
        let result = match channel.take() {
            Some(channel) => runner.watch(channel).await,
            None => match runner.authenticate().await {
                Ok(channel) => runner.watch(channel).await,
                Err(e) => Err(e),
            },
        };
        let error = match result {
            Ok(()) => SyncError::Setup("watch ended".into()),
            Err(e) => e,
        };

        if !error.is_restartable() || restarts >= policy.max_restarts {
            tracing::error!(target: "watchsync::profile", profile = %name, "profile aborted: {}", error);
            return error;
        }

        restarts += 1;
        let delay = policy.delay_for(restarts);
        tracing::warn!(
            target: "watchsync::profile",
            profile = %name,
            restart = restarts,
            max_restarts = policy.max_restarts,
            delay = ?delay,
            "profile failed, restarting: {}",
            error
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_delays_double_and_cap() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_never_policy() {
        assert_eq!(RestartPolicy::never().max_restarts, 0);
    }
}

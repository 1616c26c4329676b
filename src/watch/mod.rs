//! Change feed: turns a recursive change-notification service into a stream
//! of change batches.
//!
//! ```text
//! watch(root) --> WatchHandle --subscribe--> Subscription --> ChangeBatch...
//!                 (relative root,             (bounded channel,
//!                  opening checkpoint)         never restarted)
//! ```
//!
//! `subscribe` consumes the handle. A dropped subscription is replaced by a
//! fresh `watch` + `subscribe` pair, never by resuming from an old checkpoint.

pub mod watchman;
#[cfg(feature = "watch")]
pub mod fsnotify;

pub use watchman::Watchman;
#[cfg(feature = "watch")]
pub use fsnotify::NotifyService;

use crate::error::Result;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Channel size for service -> dispatcher batches
pub const SUBSCRIPTION_CHANNEL_SIZE: usize = 256;

// =============================================================================
// Records
// =============================================================================

/// Opaque marker meaning "changes since this point".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checkpoint(String);

impl Checkpoint {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Checkpoint for services that only offer a local sequence number.
    pub fn sequence(n: u64) -> Self {
        Self(format!("n:{}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One changed entry, relative to the watch's relative root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub path: String,
    pub exists: bool,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub checkpoint: Checkpoint,
}

impl ChangeRecord {
    pub fn file(path: impl Into<String>, checkpoint: Checkpoint) -> Self {
        Self {
            path: path.into(),
            exists: true,
            is_dir: false,
            size: None,
            checkpoint,
        }
    }
}

/// Records delivered together by one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub checkpoint: Checkpoint,
    pub records: Vec<ChangeRecord>,
}

// =============================================================================
// Watch + subscription
// =============================================================================

/// An open watch, not yet subscribed.
pub struct WatchHandle<S> {
    /// Root the service actually watches (may be an ancestor of the request).
    pub watch_root: PathBuf,
    /// Requested root relative to `watch_root`, when they differ.
    pub relative_root: Option<String>,
    /// Opening checkpoint; the subscription starts here.
    pub checkpoint: Checkpoint,
    pub(crate) state: S,
}

impl<S> fmt::Debug for WatchHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("watch_root", &self.watch_root)
            .field("relative_root", &self.relative_root)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

/// Sender half used by service backends.
pub type BatchSender = mpsc::Sender<Result<ChangeBatch>>;

/// A live, infinite stream of change batches.
///
/// Ends with `None` only when the service goes away; backends report why with
/// an `Err` item first.
pub struct Subscription {
    batches: mpsc::Receiver<Result<ChangeBatch>>,
    _resources: Option<Box<dyn Any + Send>>,
}

impl Subscription {
    /// Bounded channel plus whatever must stay alive for it to keep flowing
    /// (child process, OS watcher).
    pub fn channel(resources: Option<Box<dyn Any + Send>>) -> (BatchSender, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_SIZE);
        (
            tx,
            Subscription {
                batches: rx,
                _resources: resources,
            },
        )
    }

    pub async fn next_batch(&mut self) -> Option<Result<ChangeBatch>> {
        self.batches.recv().await
    }
}

#[async_trait]
pub trait ChangeService: Send + Sync {
    /// Backend state carried from `watch` to `subscribe`.
    type State: Send + 'static;

    async fn watch(&self, root: &Path) -> Result<WatchHandle<Self::State>>;

    async fn subscribe(&self, handle: WatchHandle<Self::State>) -> Result<Subscription>;
}

// =============================================================================
// Tests
// =============================================================================

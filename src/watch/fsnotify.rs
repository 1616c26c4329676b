//! In-process backend on the OS notification API (inotify, FSEvents, ...).
//!
//! Used when watchman is not installed. Each OS event becomes one batch and
//! a local counter stands in for the service clock.

use super::{ChangeBatch, ChangeRecord, ChangeService, Checkpoint, Subscription, WatchHandle};
use crate::error::{Result, SyncError};
use crate::path::relative_to;
use ::notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyService;

pub struct NotifyState {
    watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<::notify::Result<Event>>,
}

#[async_trait]
impl ChangeService for NotifyService {
    type State = NotifyState;

    async fn watch(&self, root: &Path) -> Result<WatchHandle<NotifyState>> {
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| SyncError::Setup(format!("cannot watch {}: {}", root.display(), e)))?;

        // The OS watcher calls back on its own thread; events queue up from
        // here on, which is what the opening checkpoint promises.
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = ::notify::recommended_watcher(move |res: ::notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| SyncError::Setup(format!("failed to create watcher: {}", e)))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Setup(format!("failed to watch {}: {}", root.display(), e)))?;

        tracing::info!(watch = %root.display(), "watch established");
        Ok(WatchHandle {
            watch_root: root,
            relative_root: None,
            checkpoint: Checkpoint::sequence(0),
            state: NotifyState { watcher, events },
        })
    }

    async fn subscribe(&self, handle: WatchHandle<NotifyState>) -> Result<Subscription> {
        let WatchHandle {
            watch_root, state, ..
        } = handle;
        let NotifyState {
            watcher,
            mut events,
        } = state;

        let (tx, subscription) = Subscription::channel(Some(Box::new(watcher)));
        tokio::spawn(async move {
            let mut sequence = 0u64;
            while let Some(event) = events.recv().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("watcher error: {}", e);
                        continue;
                    }
                };
                sequence += 1;
                let Some(batch) = to_batch(&watch_root, event, Checkpoint::sequence(sequence)).await
                else {
                    continue;
                };
                if tx.send(Ok(batch)).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(Err(SyncError::Setup("file watcher stopped".into())))
                .await;
        });
        Ok(subscription)
    }
}

async fn to_batch(root: &Path, event: Event, checkpoint: Checkpoint) -> Option<ChangeBatch> {
    if matches!(event.kind, EventKind::Access(_)) {
        return None;
    }
    let mut records = Vec::with_capacity(event.paths.len());
    for path in event.paths {
        let Some(rel) = relative_to(root, &path) else {
            continue;
        };
        records.push(stat_record(&path, rel, checkpoint.clone()).await);
    }
    if records.is_empty() {
        None
    } else {
        Some(ChangeBatch {
            checkpoint,
            records,
        })
    }
}

async fn stat_record(path: &Path, rel: String, checkpoint: Checkpoint) -> ChangeRecord {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => ChangeRecord {
            path: rel,
            exists: true,
            is_dir: meta.is_dir(),
            size: Some(meta.len()),
            checkpoint,
        },
        Err(_) => ChangeRecord {
            path: rel,
            exists: false,
            is_dir: false,
            size: None,
            checkpoint,
        },
    }
}

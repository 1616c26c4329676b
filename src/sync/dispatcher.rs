//! Turns change batches into per-file transfers.
//!
//! Each qualifying record becomes one task in a [`JoinSet`], bounded by a
//! semaphore sized from `max_concurrent_transfers`. Outcomes come back through
//! `join_next`; a plain transfer failure is logged and forgotten, a stale
//! session ends the profile.

use crate::config::Profile;
use crate::error::{Result, SyncError, TransferFailure};
use crate::transport::Transport;
use crate::watch::{ChangeBatch, Subscription};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Result of one file's transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub path: String,
    pub result: std::result::Result<(), TransferFailure>,
}

pub struct Dispatcher<T> {
    profile: Arc<Profile>,
    transport: Arc<T>,
    permits: Arc<Semaphore>,
}

impl<T: Transport + 'static> Dispatcher<T> {
    pub fn new(profile: Arc<Profile>, transport: Arc<T>) -> Self {
        let permits = Arc::new(Semaphore::new(profile.max_concurrent_transfers));
        Self {
            profile,
            transport,
            permits,
        }
    }

    /// Paths in `batch` that should be copied.
    pub fn plan(&self, batch: &ChangeBatch) -> Vec<String> {
        batch
            .records
            .iter()
            .filter_map(|record| {
                if !record.exists {
                    tracing::debug!(path = %record.path, "skip deleted entry");
                    None
                } else if self.profile.ignore.should_ignore_entry(&record.path, record.is_dir) {
                    tracing::debug!(path = %record.path, "skip ignored path");
                    None
                } else if record.is_dir {
                    tracing::debug!(path = %record.path, "skip directory");
                    None
                } else {
                    Some(record.path.clone())
                }
            })
            .collect()
    }

    fn spawn_transfer(&self, tasks: &mut JoinSet<TransferOutcome>, path: String) {
        let transport = Arc::clone(&self.transport);
        let permits = Arc::clone(&self.permits);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = transport.push_file(&path).await;
            TransferOutcome { path, result }
        });
    }

    /// Transfer every qualifying record of one batch and wait for all of them.
    pub async fn dispatch_batch(&self, batch: &ChangeBatch) -> Vec<TransferOutcome> {
        let mut tasks = JoinSet::new();
        for path in self.plan(batch) {
            self.spawn_transfer(&mut tasks, path);
        }
        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Some(outcome) = self.finish(joined) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Consume `subscription` until it ends or the session goes stale.
    ///
    /// Never returns `Ok`: the feed is infinite, so returning at all means the
    /// profile has to stop. In-flight transfers are awaited first.
    pub async fn run(&self, mut subscription: Subscription) -> Result<()> {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                batch = subscription.next_batch() => match batch {
                    Some(Ok(batch)) => {
                        tracing::debug!(
                            checkpoint = %batch.checkpoint,
                            records = batch.records.len(),
                            "change batch"
                        );
                        for path in self.plan(&batch) {
                            self.spawn_transfer(&mut tasks, path);
                        }
                    }
                    Some(Err(e)) => {
                        self.drain(&mut tasks).await;
                        return Err(e);
                    }
                    None => {
                        self.drain(&mut tasks).await;
                        return Err(SyncError::Setup("change subscription closed".into()));
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Some(TransferOutcome { result: Err(TransferFailure::Auth(reason)), .. }) =
                        self.finish(joined)
                    {
                        self.drain(&mut tasks).await;
                        return Err(SyncError::auth(self.profile.destination(), reason));
                    }
                }
            }
        }
    }

    async fn drain(&self, tasks: &mut JoinSet<TransferOutcome>) {
        while let Some(joined) = tasks.join_next().await {
            self.finish(joined);
        }
    }

    fn finish(
        &self,
        joined: std::result::Result<TransferOutcome, JoinError>,
    ) -> Option<TransferOutcome> {
        match joined {
            Ok(outcome) => {
                self.report(&outcome);
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(target: "watchsync::transfer", profile = %self.profile.name, "transfer task failed: {}", e);
                None
            }
        }
    }

    fn report(&self, outcome: &TransferOutcome) {
        match &outcome.result {
            Ok(()) => tracing::info!(
                target: "watchsync::transfer",
                profile = %self.profile.name,
                path = %outcome.path,
                "sync ok"
            ),
            Err(TransferFailure::Auth(reason)) => tracing::error!(
                target: "watchsync::transfer",
                profile = %self.profile.name,
                path = %outcome.path,
                "session lost: {}",
                reason
            ),
            Err(TransferFailure::Transfer(reason)) => tracing::error!(
                target: "watchsync::transfer",
                profile = %self.profile.name,
                path = %outcome.path,
                "sync failed, please make sure remote permissions ok: {}",
                reason
            ),
        }
    }
}

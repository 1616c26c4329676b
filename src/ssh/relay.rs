//! Interactive credential relay.
//!
//! Some hosts ask for a one-time code (a hardware token tap) while the master
//! connection is being set up. The operator types it on our stdin; the relay
//! hands exactly one line of it to the ssh child and then closes the child's
//! input.
//!
//! There is one process input stream, so there is one relay. Authentication
//! borrows it mutably, which keeps two attempts from reading it at once.

use std::io::BufRead;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;

pub struct CredentialRelay {
    lines: Option<mpsc::UnboundedReceiver<String>>,
}

impl CredentialRelay {
    /// Relay fed from the process's stdin. Create it once.
    ///
    /// Lines are read on a detached OS thread. A read still pending when the
    /// work is done never holds the process open.
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("credential-relay".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        match spawned {
            Ok(_) => Self { lines: Some(rx) },
            Err(e) => {
                tracing::warn!("cannot read operator input: {}", e);
                Self::closed()
            }
        }
    }

    /// Relay fed from any async reader. Must be called inside a runtime.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: Some(rx) }
    }

    /// Relay with nothing to give (non-interactive runs and tests).
    pub fn closed() -> Self {
        Self { lines: None }
    }

    /// Next operator line, or `None` once input is exhausted.
    ///
    /// Cancel safe: a line is never lost if the caller stops waiting because
    /// the child exited first.
    pub async fn next_line(&mut self) -> Option<String> {
        let lines = self.lines.as_mut()?;
        let line = lines.recv().await;
        if line.is_none() {
            self.lines = None;
        }
        line
    }

    /// Forward one line (if any) into the child's input and close it.
    pub async fn relay_once(line: Option<String>, mut pipe: ChildStdin) {
        if let Some(line) = line {
            let mut buf = line.into_bytes();
            buf.push(b'\n');
            if let Err(e) = pipe.write_all(&buf).await {
                tracing::debug!("credential relay write failed: {}", e);
            }
            let _ = pipe.flush().await;
        }
        drop(pipe);
    }
}

impl std::fmt::Debug for CredentialRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRelay")
            .field("open", &self.lines.is_some())
            .finish()
    }
}

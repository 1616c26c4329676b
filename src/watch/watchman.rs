//! Watchman backend.
//!
//! Every request is one `watchman -j --no-pretty` invocation with the JSON
//! command on stdin. The subscription is a persistent (`-p`) invocation whose
//! stdout carries one JSON PDU per line for as long as the child lives.

use super::{ChangeBatch, ChangeRecord, ChangeService, Checkpoint, Subscription, WatchHandle};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};

const SUBSCRIPTION_NAME: &str = "watchsync";

#[derive(Debug, Clone)]
pub struct Watchman {
    command: String,
}

impl Watchman {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-j").arg("--no-pretty");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// One request/response round trip.
    async fn query(&self, request: Value) -> Result<Value> {
        let mut child = self
            .base_command()
            .spawn()
            .map_err(|e| SyncError::Setup(format!("failed to run {}: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{}\n", request).as_bytes())
                .await
                .map_err(pipe_error("request"))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(pipe_error("response"))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().unwrap_or_default();
        let response: Value = serde_json::from_str(line).map_err(|e| {
            SyncError::Setup(format!(
                "unreadable watchman response ({}): {}",
                e,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        })?;
        check_error(&response)?;
        Ok(response)
    }

    /// Fails unless the server supports `relative_root`.
    pub async fn capability_check(&self) -> Result<()> {
        self.query(json!(["version", { "required": ["relative_root"] }]))
            .await
            .map(|_| ())
            .map_err(|e| SyncError::Setup(format!("watchman is missing or too old: {}", e)))
    }
}

/// Pipe failures mean the service is unusable, not that local I/O broke.
fn pipe_error(stage: &'static str) -> impl Fn(std::io::Error) -> SyncError {
    move |e| SyncError::Setup(format!("watchman {} failed: {}", stage, e))
}

/// Forward the persistent child's diagnostics so its stderr pipe never fills.
fn forward_stderr(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => tracing::warn!(
                    target: "watchsync::watchman",
                    "{}",
                    String::from_utf8_lossy(&buf).trim_end()
                ),
            }
        }
    });
}

fn check_error(response: &Value) -> Result<()> {
    match response.get("error").and_then(Value::as_str) {
        Some(err) => Err(SyncError::Setup(err.to_string())),
        None => Ok(()),
    }
}

#[async_trait]
impl ChangeService for Watchman {
    type State = ();

    async fn watch(&self, root: &Path) -> Result<WatchHandle<()>> {
        self.capability_check().await?;

        let resp = self
            .query(json!(["watch-project", root.to_string_lossy()]))
            .await?;
        if let Some(warning) = resp.get("warning").and_then(Value::as_str) {
            tracing::warn!("watchman: {}", warning);
        }
        let watch_root = resp
            .get("watch")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| SyncError::Setup("watch-project returned no watch root".into()))?;
        let relative_root = resp
            .get("relative_path")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let clock = self
            .query(json!(["clock", watch_root.to_string_lossy()]))
            .await?;
        let checkpoint = clock
            .get("clock")
            .and_then(Value::as_str)
            .map(Checkpoint::new)
            .ok_or_else(|| SyncError::Setup("clock returned no clock".into()))?;

        tracing::info!(
            watch = %watch_root.display(),
            relative_root = relative_root.as_deref().unwrap_or(""),
            %checkpoint,
            "watch established"
        );
        Ok(WatchHandle {
            watch_root,
            relative_root,
            checkpoint,
            state: (),
        })
    }

    async fn subscribe(&self, handle: WatchHandle<()>) -> Result<Subscription> {
        let request = subscribe_request(&handle);

        let mut cmd = self.base_command();
        cmd.arg("-p");
        let mut child = cmd
            .spawn()
            .map_err(|e| SyncError::Setup(format!("failed to run {}: {}", self.command, e)))?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr);
        }
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Setup("watchman stdin unavailable".into()))?;
        stdin
            .write_all(format!("{}\n", request).as_bytes())
            .await
            .map_err(pipe_error("subscribe request"))?;
        stdin.flush().await.map_err(pipe_error("subscribe request"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Setup("watchman stdout unavailable".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        // First PDU acknowledges (or rejects) the subscription.
        let ack = lines
            .next_line()
            .await
            .map_err(pipe_error("subscribe response"))?
            .ok_or_else(|| SyncError::Setup("watchman closed before acknowledging".into()))?;
        let ack: Value = serde_json::from_str(&ack)
            .map_err(|e| SyncError::Setup(format!("unreadable subscribe response: {}", e)))?;
        check_error(&ack)?;
        tracing::info!("subscription established");

        let resources: (Child, ChildStdin) = (child, stdin);
        let (tx, subscription) = Subscription::channel(Some(Box::new(resources)));
        tokio::spawn(async move {
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        let _ = tx
                            .send(Err(SyncError::Setup("watchman subscription closed".into())))
                            .await;
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(pipe_error("subscription")(e))).await;
                        break;
                    }
                };
                match parse_pdu(&line) {
                    Ok(Some(batch)) => {
                        if tx.send(Ok(batch)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        Ok(subscription)
    }
}

fn subscribe_request(handle: &WatchHandle<()>) -> Value {
    let mut query = json!({
        "expression": ["anyof", ["match", "*"], ["match", ".*"]],
        "fields": ["name", "size", "exists", "type"],
        "since": handle.checkpoint.as_str(),
    });
    if let Some(rel) = &handle.relative_root {
        query["relative_root"] = json!(rel);
    }
    json!([
        "subscribe",
        handle.watch_root.to_string_lossy(),
        SUBSCRIPTION_NAME,
        query
    ])
}

#[derive(Debug, Deserialize)]
struct Pdu {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    clock: Option<String>,
    #[serde(default)]
    files: Option<Vec<FileEntry>>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default = "default_exists")]
    exists: bool,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

fn default_exists() -> bool {
    true
}

/// Decode one line of subscription output. PDUs without files (state
/// assertions, logs) yield `None`.
pub(crate) fn parse_pdu(line: &str) -> Result<Option<ChangeBatch>> {
    let pdu: Pdu = serde_json::from_str(line)
        .map_err(|e| SyncError::Setup(format!("unreadable watchman PDU: {}", e)))?;
    if let Some(err) = pdu.error {
        return Err(SyncError::Setup(err));
    }
    let Some(files) = pdu.files else {
        return Ok(None);
    };
    let checkpoint = Checkpoint::new(pdu.clock.unwrap_or_default());
    let records = files
        .into_iter()
        .map(|f| ChangeRecord {
            path: f.name,
            exists: f.exists,
            is_dir: f.kind.as_deref() == Some("d"),
            size: f.size,
            checkpoint: checkpoint.clone(),
        })
        .collect();
    Ok(Some(ChangeBatch {
        checkpoint,
        records,
    }))
}

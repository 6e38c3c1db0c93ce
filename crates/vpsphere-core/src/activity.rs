//! Operator activity log.
//!
//! Appends one JSON object per line for every command, forwarded input,
//! directory change and process exit. Writing is best-effort: a failing log
//! never stalls a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

use crate::SessionKey;

/// Something the operator did, or something that happened to their session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// A shell command was accepted for execution.
    Command { command: String, cwd: String },
    /// A line was written to a running process's stdin.
    Input { text: String },
    /// The working directory changed.
    DirectoryChange { path: String },
    /// The process exited. `None` when it was killed by a signal.
    Exit { code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub key: SessionKey,
    pub event: ActivityEvent,
}

pub struct ActivityLog {
    path: PathBuf,
    // Serializes appends from concurrent sessions.
    write_lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an event. Errors are logged and swallowed.
    pub async fn record(&self, key: SessionKey, event: ActivityEvent) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            key,
            event,
        };

        match serde_json::to_string(&entry) {
            Ok(mut line) => {
                line.push('\n');
                let _guard = self.write_lock.lock().await;
                if let Err(e) = self.append_line(&line).await {
                    error!(path = %self.path.display(), error = %e, "failed to write activity log");
                }
            }
            Err(e) => {
                error!(error = %e, "failed to serialize activity event");
            }
        }
    }

    async fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read back an activity log, skipping lines that do not parse.
pub async fn load_activity(path: &Path) -> std::io::Result<Vec<ActivityEntry>> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActivityEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                error!(error = %e, "skipping malformed activity line");
            }
        }
    }
    Ok(entries)
}

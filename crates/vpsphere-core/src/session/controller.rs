//! Routes operator text to a running process, a directory change, or a new
//! shell command, and owns the lifecycle of the sessions it starts.
//!
//! Submission happens in two steps. [`ShellSessionController::accept`] does
//! the quick part (routing, spawning, registration) and returns a
//! [`RunningSession`] for new commands; [`RunningSession::drive`] streams the
//! output until exit. Transports call `accept` inline and spawn `drive`, so
//! the next message from the same chat already sees the registered process.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::process::{terminate, wait_exit, ProcessHandle, ShellProcess};
use super::registry::{ReleaseGuard, SessionRegistry};
use super::streamer::{ChunkedOutputStreamer, StreamSummary};
use super::workdir::WorkingDirectoryState;
use super::{SessionKey, DEFAULT_CHUNK_THRESHOLD};
use crate::activity::{ActivityEvent, ActivityLog};
use crate::error::{VpsError, VpsResult};
use crate::escape::inline_code;
use crate::sink::{OutgoingChunk, OutputSink};

/// The only directive intercepted before the shell.
const CD_PREFIX: &str = "cd ";

/// Knobs for spawned commands and output chunking.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Shell the command line is passed to with `-c`.
    pub shell: String,
    /// Value of `TERM` in the child environment.
    pub term: String,
    /// Buffered characters that trigger a mid-stream flush.
    pub chunk_threshold: usize,
    /// Longest final tail sent inline; longer tails become a file.
    pub message_limit: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            term: "xterm".to_string(),
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            message_limit: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

/// How a submission was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Blank text; nothing to do.
    Ignored,
    /// Written to the stdin of the process already running for the key.
    Forwarded,
    /// A process was running but its stdin could not take the text.
    InputRejected,
    /// The working directory is now the given path.
    DirectoryChanged(PathBuf),
    /// The resolved path is not a directory; state unchanged.
    DirectoryRejected(PathBuf),
    /// The command could not be started.
    SpawnFailed,
    /// The command ran and its output was streamed.
    Completed {
        exit_code: Option<i32>,
        summary: StreamSummary,
    },
}

/// Result of [`ShellSessionController::accept`].
pub enum Accepted {
    /// Fully handled.
    Done(Submission),
    /// A new process is registered; drive it to completion.
    Running(RunningSession),
}

/// Orchestrates sessions for all conversations.
pub struct ShellSessionController {
    registry: Arc<SessionRegistry>,
    workdir: Arc<WorkingDirectoryState>,
    activity: Option<Arc<ActivityLog>>,
    config: ControllerConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ShellSessionController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        workdir: Arc<WorkingDirectoryState>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            registry,
            workdir,
            activity: None,
            config,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_activity_log(mut self, log: Arc<ActivityLog>) -> Self {
        self.activity = Some(log);
        self
    }

    /// Cancel sessions through `token` instead of a private one.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn workdir(&self) -> &Arc<WorkingDirectoryState> {
        &self.workdir
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Accept and, for new commands, stream to completion in place.
    pub async fn submit(
        &self,
        key: SessionKey,
        raw_text: &str,
        sink: &dyn OutputSink,
    ) -> VpsResult<Submission> {
        match self.accept(key, raw_text, sink).await? {
            Accepted::Done(submission) => Ok(submission),
            Accepted::Running(session) => session.drive(sink).await,
        }
    }

    /// Route `raw_text` for `key`.
    ///
    /// With a process already registered for `key` the raw text goes to its
    /// stdin. Otherwise the trimmed text is either a `cd` directive or a
    /// command line to spawn. Fails with `AlreadyActive` only when another
    /// submission registered the key between lookup and registration; the
    /// freshly spawned process is killed in that case.
    pub async fn accept(
        &self,
        key: SessionKey,
        raw_text: &str,
        sink: &dyn OutputSink,
    ) -> VpsResult<Accepted> {
        if let Some(process) = self.registry.lookup(key) {
            let submission = self.forward(key, &process, raw_text, sink).await;
            return Ok(Accepted::Done(submission));
        }

        let text = raw_text.trim();
        if text.is_empty() {
            return Ok(Accepted::Done(Submission::Ignored));
        }

        if let Some(target) = parse_cd(text) {
            let submission = self.change_directory(key, target, sink).await?;
            return Ok(Accepted::Done(submission));
        }

        self.start_command(key, text, sink).await
    }

    /// Hand `session` to the controller's task tracker to be driven with
    /// `sink`. Shutdown waits for these tasks.
    pub fn spawn_session(&self, session: RunningSession, sink: Arc<dyn OutputSink>) {
        self.tasks.spawn(async move {
            let key = session.key;
            match session.drive(sink.as_ref()).await {
                Ok(submission) => debug!(key = %key, ?submission, "session finished"),
                Err(VpsError::Cancelled) => info!(key = %key, "session cancelled"),
                Err(e) => warn!(key = %key, error = %e, "session failed"),
            }
        });
    }

    /// Cancel every running session and wait until each has cleaned up.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(remaining = self.registry.count(), "all sessions stopped");
    }

    async fn forward(
        &self,
        key: SessionKey,
        process: &ProcessHandle,
        raw_text: &str,
        sink: &dyn OutputSink,
    ) -> Submission {
        self.record(
            key,
            ActivityEvent::Input {
                text: raw_text.to_string(),
            },
        )
        .await;

        match process.write_line(raw_text).await {
            Ok(()) => Submission::Forwarded,
            Err(e) => {
                warn!(key = %key, pid = ?process.pid(), error = %e, "stdin write failed");
                notify(
                    sink,
                    OutgoingChunk::markdown(
                        key,
                        format!("⚠️ Input not delivered:\n{}", inline_code(&e.to_string())),
                    ),
                )
                .await;
                Submission::InputRejected
            }
        }
    }

    async fn change_directory(
        &self,
        key: SessionKey,
        target: &str,
        sink: &dyn OutputSink,
    ) -> VpsResult<Submission> {
        match self.workdir.change_to(target).await {
            Ok(path) => {
                self.record(
                    key,
                    ActivityEvent::DirectoryChange {
                        path: path.display().to_string(),
                    },
                )
                .await;
                notify(
                    sink,
                    OutgoingChunk::markdown(
                        key,
                        format!("📁 Moved to:\n{}", inline_code(&path.display().to_string())),
                    ),
                )
                .await;
                Ok(Submission::DirectoryChanged(path))
            }
            Err(VpsError::NotADirectory(path)) => {
                debug!(key = %key, path = %path.display(), "cd target rejected");
                notify(
                    sink,
                    OutgoingChunk::markdown(
                        key,
                        format!(
                            "❌ Folder not found:\n{}",
                            inline_code(&path.display().to_string())
                        ),
                    ),
                )
                .await;
                Ok(Submission::DirectoryRejected(path))
            }
            Err(e) => Err(e),
        }
    }

    async fn start_command(
        &self,
        key: SessionKey,
        command: &str,
        sink: &dyn OutputSink,
    ) -> VpsResult<Accepted> {
        notify(
            sink,
            OutgoingChunk::markdown(key, format!("⏳ Running command:\n{}", inline_code(command))),
        )
        .await;

        let cwd = self.workdir.current().await;
        self.record(
            key,
            ActivityEvent::Command {
                command: command.to_string(),
                cwd: cwd.display().to_string(),
            },
        )
        .await;

        let process =
            match ShellProcess::spawn(&self.config.shell, command, &cwd, &self.config.term) {
                Ok(process) => process,
                Err(e) => {
                    warn!(key = %key, error = %e, "spawn failed");
                    notify(
                        sink,
                        OutgoingChunk::markdown(
                            key,
                            format!("❌ Failed to run command:\n{}", inline_code(&e.to_string())),
                        ),
                    )
                    .await;
                    return Ok(Accepted::Done(Submission::SpawnFailed));
                }
            };

        let (mut child, handle, output) = process.into_parts();
        if let Err(e) = self.registry.register(key, handle) {
            warn!(key = %key, "lost registration race, killing new process");
            terminate(&mut child).await;
            notify(
                sink,
                OutgoingChunk::plain(
                    key,
                    "⚠️ Another command is still running in this chat. Send input to it or wait for it to finish.",
                ),
            )
            .await;
            return Err(e);
        }

        Ok(Accepted::Running(RunningSession {
            key,
            child,
            output,
            guard: ReleaseGuard::new(self.registry.clone(), key),
            shutdown: self.shutdown.clone(),
            activity: self.activity.clone(),
            chunk_threshold: self.config.chunk_threshold,
            message_limit: self.config.message_limit,
        }))
    }

    async fn record(&self, key: SessionKey, event: ActivityEvent) {
        if let Some(log) = &self.activity {
            log.record(key, event).await;
        }
    }
}

/// A registered process whose output has not been streamed yet.
///
/// Dropping it kills the child and releases the key.
pub struct RunningSession {
    key: SessionKey,
    child: Child,
    output: mpsc::Receiver<Vec<u8>>,
    guard: ReleaseGuard,
    shutdown: CancellationToken,
    activity: Option<Arc<ActivityLog>>,
    chunk_threshold: usize,
    message_limit: usize,
}

impl RunningSession {
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Stream output until the process closes it, wait for exit, release
    /// the key. On shutdown the process is killed, the key released, and
    /// `Cancelled` returned.
    pub async fn drive(self, sink: &dyn OutputSink) -> VpsResult<Submission> {
        let Self {
            key,
            mut child,
            mut output,
            guard,
            shutdown,
            activity,
            chunk_threshold,
            message_limit,
        } = self;

        let streamer = ChunkedOutputStreamer::new(key, chunk_threshold, message_limit, sink);
        let streamed = tokio::select! {
            summary = streamer.run(&mut output) => Some(summary),
            _ = shutdown.cancelled() => None,
        };
        let Some(summary) = streamed else {
            return cancel(key, &mut child, guard).await;
        };

        let exited = tokio::select! {
            code = wait_exit(&mut child) => Some(code),
            _ = shutdown.cancelled() => None,
        };
        let exit_code = match exited {
            Some(Ok(code)) => code,
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "failed to wait for process");
                None
            }
            None => return cancel(key, &mut child, guard).await,
        };

        guard.release();
        if let Some(log) = &activity {
            log.record(key, ActivityEvent::Exit { code: exit_code }).await;
        }
        Ok(Submission::Completed { exit_code, summary })
    }
}

async fn cancel(key: SessionKey, child: &mut Child, guard: ReleaseGuard) -> VpsResult<Submission> {
    info!(key = %key, "shutdown requested, killing session process");
    terminate(child).await;
    guard.release();
    Err(VpsError::Cancelled)
}

/// Deliver a status message; failures are logged only.
async fn notify(sink: &dyn OutputSink, chunk: OutgoingChunk) {
    let key = chunk.key();
    if let Err(e) = sink.deliver(chunk).await {
        warn!(key = %key, error = %e, "notification not delivered");
    }
}

/// The path argument of a `cd` directive, if `text` is one.
fn parse_cd(text: &str) -> Option<&str> {
    let prefix = text.get(..CD_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(CD_PREFIX) {
        return None;
    }
    let target = text[CD_PREFIX.len()..].trim();
    (!target.is_empty()).then_some(target)
}

//! Shell subprocess with piped stdio.
//!
//! The command line is handed to the configured shell with `-c`. Stdout and
//! stderr are read line by line on two pump tasks that feed one aggregate
//! channel, so the session sees a single merged output stream.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::error::{VpsError, VpsResult};

/// Capacity of the merged output channel, in lines.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Longest run of bytes read as one fragment when no newline arrives.
const MAX_FRAGMENT_BYTES: u64 = 64 * 1024;

/// Shareable handle to a running process: identity plus its stdin.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    command: String,
    started_at: Instant,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .finish()
    }
}

impl ProcessHandle {
    /// A handle with no attached input, used where only identity matters.
    pub fn detached(command: &str) -> Self {
        Self {
            pid: None,
            command: command.to_string(),
            started_at: Instant::now(),
            stdin: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Write `text` followed by a newline to the process's stdin.
    pub async fn write_line(&self, text: &str) -> VpsResult<()> {
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| VpsError::Input("process input is closed".into()))?;

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        let result = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        }
        .await;

        if let Err(e) = result {
            // Broken pipe: the process stopped reading. Drop our end so later
            // writes fail fast.
            *stdin = None;
            return Err(VpsError::Input(e.to_string()));
        }
        debug!(pid = ?self.pid, bytes = line.len(), "forwarded input");
        Ok(())
    }
}

/// A spawned shell command and its merged output stream.
pub struct ShellProcess {
    child: Child,
    handle: ProcessHandle,
    output: mpsc::Receiver<Vec<u8>>,
}

impl ShellProcess {
    /// Spawn `shell -c command` in `cwd` with `TERM` set to `term`.
    ///
    /// Must be called from within a Tokio runtime: the output pumps are
    /// spawned as tasks.
    pub fn spawn(shell: &str, command: &str, cwd: &Path, term: &str) -> VpsResult<Self> {
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .env("TERM", term)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| VpsError::SpawnFailure(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VpsError::SpawnFailure("stdout pipe was not available".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VpsError::SpawnFailure("stderr pipe was not available".into()))?;
        let stdin = child.stdin.take();

        let (tx, output) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::spawn(pump_lines(stdout, tx.clone()));
        tokio::spawn(pump_lines(stderr, tx));

        let handle = ProcessHandle {
            pid: child.id(),
            command: command.to_string(),
            started_at: Instant::now(),
            stdin: Arc::new(Mutex::new(stdin)),
        };
        info!(pid = ?handle.pid, cwd = %cwd.display(), "process spawned");

        Ok(Self {
            child,
            handle,
            output,
        })
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Split into the child, its shareable handle, and the output stream.
    pub fn into_parts(self) -> (Child, ProcessHandle, mpsc::Receiver<Vec<u8>>) {
        (self.child, self.handle, self.output)
    }
}

/// Wait for `child` to exit and return its exit code (`None` if signalled).
pub async fn wait_exit(child: &mut Child) -> VpsResult<Option<i32>> {
    let pid = child.id();
    let status = child.wait().await?;
    let code = status.code();
    info!(pid = ?pid, code = ?code, "process exited");
    Ok(code)
}

/// Kill `child` and reap it. Errors (already exited) are ignored.
pub async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed, process likely already exited");
    }
}

/// Forward newline-terminated fragments from `reader` until EOF, a read
/// error, or the receiver going away.
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut fragment = Vec::new();
        match (&mut reader)
            .take(MAX_FRAGMENT_BYTES)
            .read_until(b'\n', &mut fragment)
            .await
        {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(fragment).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "output read failed");
                break;
            }
        }
    }
}

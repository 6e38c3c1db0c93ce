//! Session pipeline: process lifecycle, output chunking, working directory.

pub mod buffer;
pub mod controller;
pub mod process;
pub mod registry;
pub mod spillover;
pub mod streamer;
pub mod workdir;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use buffer::OutputBuffer;
pub use controller::{Accepted, ControllerConfig, RunningSession, ShellSessionController, Submission};
pub use process::{ProcessHandle, ShellProcess};
pub use registry::{ReleaseGuard, SessionRegistry};
pub use spillover::{deliver_tail, SPILLOVER_FILE_NAME};
pub use streamer::{ChunkedOutputStreamer, StreamSummary};
pub use workdir::WorkingDirectoryState;

/// Default flush threshold and inline message limit, in characters.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 3500;

/// Identifies the conversation a session belongs to (the chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub i64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

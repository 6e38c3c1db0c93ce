//! vpsphere-core: shell sessions for a single-operator remote-control bot.
//!
//! Runs operator commands as subprocesses, streams their merged output back
//! in chat-sized chunks, routes follow-up messages to a running process's
//! stdin, and tracks the working directory between commands. The chat
//! transport plugs in through [`sink::OutputSink`].

pub mod activity;
pub mod auth;
pub mod error;
pub mod escape;
pub mod session;
pub mod sink;

// Re-export commonly used items at crate root.
pub use activity::{ActivityEvent, ActivityLog};
pub use auth::{AuthorizedOperator, OperatorGate};
pub use error::{VpsError, VpsResult};
pub use escape::{escape_html, escape_markdown, unescape_markdown};
pub use session::{
    Accepted, ControllerConfig, RunningSession, SessionKey, SessionRegistry,
    ShellSessionController, Submission, WorkingDirectoryState,
};
pub use sink::{Markup, OutgoingChunk, OutputSink};

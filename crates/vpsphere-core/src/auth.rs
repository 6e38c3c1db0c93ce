//! Single-operator authorization gate.
//!
//! Exactly one identity may drive the bot. Every inbound event is checked
//! here before it reaches any session state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// The one user id allowed to operate the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizedOperator(pub u64);

impl fmt::Display for AuthorizedOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gate consulted once per inbound event.
#[derive(Debug, Clone)]
pub struct OperatorGate {
    operator: AuthorizedOperator,
}

impl OperatorGate {
    pub fn new(operator: AuthorizedOperator) -> Self {
        Self { operator }
    }

    pub fn operator(&self) -> AuthorizedOperator {
        self.operator
    }

    /// Whether an event from `sender` may proceed. Events without a sender
    /// (channel posts, service messages) are always refused.
    pub fn permits(&self, sender: Option<u64>) -> bool {
        match sender {
            Some(id) if id == self.operator.0 => true,
            Some(id) => {
                warn!(sender = id, "rejected event from unauthorized user");
                false
            }
            None => false,
        }
    }
}

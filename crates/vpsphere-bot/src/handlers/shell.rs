use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, warn};
use vpsphere_core::{Accepted, SessionKey};

use super::{BotState, HandlerResult};

/// Plain text from the operator: input for a running process, a `cd`, or a
/// new command. New commands are streamed on a tracked task so the next
/// message from this chat is handled right away.
pub async fn text(msg: Message, state: Arc<BotState>) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let key = SessionKey(msg.chat.id.0);

    match state.controller.accept(key, text, state.sink.as_ref()).await {
        Ok(Accepted::Running(session)) => {
            state.controller.spawn_session(session, state.sink.clone());
        }
        Ok(Accepted::Done(submission)) => {
            debug!(key = %key, ?submission, "message handled");
        }
        Err(e) => warn!(key = %key, error = %e, "message not handled"),
    }
    Ok(())
}

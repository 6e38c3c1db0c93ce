use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{debug, warn};
use vpsphere_core::escape::inline_code;

use super::commands::delete_recent;
use super::{BotState, HandlerResult};
use crate::system::{list_directory, render_listing, ServerStatus};

/// Inline-button actions from the help keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Clear,
    List,
    Status,
}

impl Action {
    pub fn from_data(data: &str) -> Option<Self> {
        match data {
            "clear" => Some(Self::Clear),
            "ls" => Some(Self::List),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

pub async fn handle(bot: Bot, q: CallbackQuery, state: Arc<BotState>) -> HandlerResult {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(action) = q.data.as_deref().and_then(Action::from_data) else {
        debug!(data = ?q.data, "unknown callback data");
        return Ok(());
    };
    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat = message.chat().id;

    match action {
        Action::Clear => delete_recent(&bot, chat, message.id()).await,
        Action::List => {
            let cwd = state.controller.workdir().current().await;
            let reply = match list_directory(&cwd).await {
                Ok(names) => render_listing(&names),
                Err(e) => {
                    warn!(path = %cwd.display(), error = %e, "listing failed");
                    format!("❌ Cannot list folder:\n{}", inline_code(&e.to_string()))
                }
            };
            bot.send_message(chat, reply)
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
        Action::Status => {
            let reply = match ServerStatus::collect().await {
                Ok(status) => status.render(),
                Err(e) => {
                    warn!(error = %e, "status collection failed");
                    format!("❌ Status error:\n{}", inline_code(&e.to_string()))
                }
            };
            bot.send_message(chat, reply)
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
    }
    Ok(())
}

use std::path::Path;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode};
use tracing::{debug, info, warn};
use vpsphere_core::escape::inline_code;
use vpsphere_core::escape_markdown;

use super::{BotState, Command, HandlerResult, CLEAR_DEPTH};

const WELCOME: &str = "*Welcome to VPSphere\\!*\n\n\
    This bot lets you manage the server straight from Telegram\\.\n\n\
    Send `/help` to see the available commands\\.\n\n\
    ⚠️ *Only the authorized operator can use this bot\\!*";

const HELP: &str = "*VPSphere help:*\n\
    ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\
    `cd [folder]` \\- change directory\n\
    `[shell command]` \\- run any command\n\
    `/upload` \\- upload a file to the server\n\
    `/download [file]` \\- fetch a file from the server\n\
    `/clear` \\- delete recent messages\n\
    `/help` \\- show this menu\n\n\
    *Examples:*\n\
    `apt update && apt upgrade -y`\n\
    `tail -n 50 /var/log/syslog`\n\
    ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

pub async fn handle(bot: Bot, msg: Message, cmd: Command, state: Arc<BotState>) -> HandlerResult {
    debug!(chat = msg.chat.id.0, command = ?cmd, "bot command");
    match cmd {
        Command::Start => {
            bot.send_message(msg.chat.id, WELCOME)
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, HELP)
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(help_keyboard())
                .await?;
        }
        Command::Upload => {
            let text = format!(
                "{} {}{}",
                escape_markdown("📤 Send a file (up to 2GB). It will be stored in the"),
                inline_code(&format!("{}/", state.upload_dir_name)),
                escape_markdown(" folder."),
            );
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
        Command::Download(name) => download(&bot, &msg, name.trim(), &state).await?,
        Command::Clear => {
            delete_recent(&bot, msg.chat.id, msg.id).await;
            bot.send_message(msg.chat.id, "🧹 *Chat cleared\\.*")
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
    }
    Ok(())
}

pub fn help_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("🧹 Clear", "clear"),
        InlineKeyboardButton::callback("📂 List folder", "ls"),
        InlineKeyboardButton::callback("📊 Server status", "status"),
    ]])
}

async fn download(bot: &Bot, msg: &Message, name: &str, state: &BotState) -> HandlerResult {
    if name.is_empty() || name.split_whitespace().count() != 1 {
        bot.send_message(msg.chat.id, "❗ Usage: `/download file_name.ext`")
            .parse_mode(ParseMode::MarkdownV2)
            .await?;
        return Ok(());
    }

    let cwd = state.controller.workdir().current().await;
    let path = cwd.join(name);
    if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
        bot.send_message(msg.chat.id, "❌ File not found.").await?;
        return Ok(());
    }

    info!(path = %path.display(), "sending file to operator");
    let file_name = display_name(&path, name);
    let sent = bot
        .send_document(msg.chat.id, InputFile::file(&path).file_name(file_name))
        .await;
    if let Err(e) = sent {
        warn!(path = %path.display(), error = %e, "download failed");
        bot.send_message(
            msg.chat.id,
            format!("❌ Failed to send file:\n{}", inline_code(&e.to_string())),
        )
        .parse_mode(ParseMode::MarkdownV2)
        .await?;
    }
    Ok(())
}

/// Name shown for a downloaded file: its final component, or the request
/// text when the path has none.
fn display_name(path: &Path, requested: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| requested.to_string())
}

/// Best-effort removal of the `CLEAR_DEPTH` messages ending at `newest`.
pub async fn delete_recent(bot: &Bot, chat: ChatId, newest: MessageId) {
    let mut deleted = 0;
    for offset in 0..CLEAR_DEPTH {
        let id = newest.0 - offset;
        if id <= 0 {
            break;
        }
        if bot.delete_message(chat, MessageId(id)).await.is_ok() {
            deleted += 1;
        }
    }
    debug!(chat = chat.0, deleted, "cleared messages");
}

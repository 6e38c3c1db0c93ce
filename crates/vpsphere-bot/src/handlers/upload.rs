use chrono::{DateTime, Local};
use std::path::Path;
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, ParseMode};
use tracing::{info, warn};
use vpsphere_core::escape_html;

use super::{BotState, HandlerError, HandlerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
}

impl MediaKind {
    fn of(msg: &Message) -> Option<(Self, FileId)> {
        if let Some(sizes) = msg.photo() {
            let largest = sizes.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
            return Some((Self::Photo, largest.file.id.clone()));
        }
        if let Some(video) = msg.video() {
            return Some((Self::Video, video.file.id.clone()));
        }
        msg.audio().map(|audio| (Self::Audio, audio.file.id.clone()))
    }

    fn prefix_and_extension(self) -> (&'static str, &'static str) {
        match self {
            Self::Photo => ("photo", "jpg"),
            Self::Video => ("video", "mp4"),
            Self::Audio => ("audio", "mp3"),
        }
    }
}

/// Timestamped name for an uploaded photo, video or audio clip.
pub fn media_file_name(kind: MediaKind, now: DateTime<Local>) -> String {
    let (prefix, ext) = kind.prefix_and_extension();
    format!("{prefix}_{}.{ext}", now.format("%Y%m%d_%H%M%S"))
}

/// Name to store a document under: the final component of what the client
/// sent, or a timestamped fallback when that is unusable.
pub fn document_file_name(sent: Option<&str>, now: DateTime<Local>) -> String {
    sent.and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("document_{}", now.format("%Y%m%d_%H%M%S")))
}

pub async fn document(bot: Bot, msg: Message, state: Arc<BotState>) -> HandlerResult {
    let Some(doc) = msg.document() else {
        return Ok(());
    };
    let name = document_file_name(doc.file_name.as_deref(), Local::now());
    store(&bot, &msg, &state, &doc.file.id, &name, "Upload successful!").await
}

pub async fn media(bot: Bot, msg: Message, state: Arc<BotState>) -> HandlerResult {
    let Some((kind, file_id)) = MediaKind::of(&msg) else {
        bot.send_message(msg.chat.id, "❌ No media to upload.").await?;
        return Ok(());
    };
    let name = media_file_name(kind, Local::now());
    store(&bot, &msg, &state, &file_id, &name, "Media uploaded!").await
}

async fn store(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    file_id: &FileId,
    name: &str,
    headline: &str,
) -> HandlerResult {
    let dir = state
        .controller
        .workdir()
        .current()
        .await
        .join(&state.upload_dir_name);
    let target = dir.join(name);

    let reply = match fetch(bot, file_id, &dir, &target).await {
        Ok(()) => {
            info!(path = %target.display(), "upload stored");
            format!(
                "✅ <b>{}</b>\nFile name: <code>{}</code>\nLocation: <code>{}</code>",
                escape_html(headline),
                escape_html(name),
                escape_html(&target.display().to_string()),
            )
        }
        Err(e) => {
            warn!(path = %target.display(), error = %e, "upload failed");
            format!("❌ Upload failed:\n<code>{}</code>", escape_html(&e.to_string()))
        }
    };
    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn fetch(bot: &Bot, file_id: &FileId, dir: &Path, target: &Path) -> Result<(), HandlerError> {
    tokio::fs::create_dir_all(dir).await?;
    let file = bot.get_file(file_id.clone()).await?;
    let mut dst = tokio::fs::File::create(target).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(())
}

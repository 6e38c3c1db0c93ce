//! Telegram implementation of the core's output seam.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};
use tracing::debug;
use vpsphere_core::{Markup, OutgoingChunk, OutputSink, SessionKey, VpsError, VpsResult};

/// Sends chunks to the chat whose id is the chunk's session key.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

pub fn chat_of(key: SessionKey) -> ChatId {
    ChatId(key.0)
}

pub fn parse_mode(markup: Markup) -> Option<ParseMode> {
    match markup {
        Markup::Plain => None,
        Markup::MarkdownV2 => Some(ParseMode::MarkdownV2),
        Markup::Html => Some(ParseMode::Html),
    }
}

#[async_trait]
impl OutputSink for TelegramSink {
    async fn deliver(&self, chunk: OutgoingChunk) -> VpsResult<()> {
        let sent = match chunk {
            OutgoingChunk::Text {
                key,
                rendered,
                markup,
            } => {
                let request = self.bot.send_message(chat_of(key), rendered);
                match parse_mode(markup) {
                    Some(mode) => request.parse_mode(mode).await,
                    None => request.await,
                }
            }
            OutgoingChunk::File {
                key,
                path,
                file_name,
            } => {
                debug!(key = %key, path = %path.display(), "uploading output file");
                self.bot
                    .send_document(chat_of(key), InputFile::file(path).file_name(file_name))
                    .await
            }
        };
        sent.map(drop)
            .map_err(|e| VpsError::Delivery(e.to_string()))
    }
}

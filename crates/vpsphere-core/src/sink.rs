//! Outbound seam between the session pipeline and the chat transport.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{VpsError, VpsResult};
use crate::SessionKey;

/// How the transport should interpret a text chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Plain,
    MarkdownV2,
    Html,
}

/// One unit of output handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingChunk {
    Text {
        key: SessionKey,
        rendered: String,
        markup: Markup,
    },
    /// A file on disk to be uploaded as a document. The path is only valid
    /// for the duration of the `deliver` call.
    File {
        key: SessionKey,
        path: PathBuf,
        file_name: String,
    },
}

impl OutgoingChunk {
    pub fn markdown(key: SessionKey, rendered: impl Into<String>) -> Self {
        Self::Text {
            key,
            rendered: rendered.into(),
            markup: Markup::MarkdownV2,
        }
    }

    pub fn plain(key: SessionKey, text: impl Into<String>) -> Self {
        Self::Text {
            key,
            rendered: text.into(),
            markup: Markup::Plain,
        }
    }

    pub fn key(&self) -> SessionKey {
        match self {
            Self::Text { key, .. } | Self::File { key, .. } => *key,
        }
    }
}

/// Delivers chunks to the conversation they belong to.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn deliver(&self, chunk: OutgoingChunk) -> VpsResult<()>;
}

/// A delivered chunk as observed by [`MemorySink`]. File contents are read
/// at delivery time because the artifact is removed right after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Text { rendered: String, markup: Markup },
    File { file_name: String, contents: Vec<u8> },
}

/// In-memory sink that records everything it is given.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Delivered>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails after being recorded.
    pub fn failing() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Rendered bodies of all text chunks, in delivery order.
    pub fn texts(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .filter_map(|d| match d {
                Delivered::Text { rendered, .. } => Some(rendered),
                Delivered::File { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn deliver(&self, chunk: OutgoingChunk) -> VpsResult<()> {
        let entry = match chunk {
            OutgoingChunk::Text {
                rendered, markup, ..
            } => Delivered::Text { rendered, markup },
            OutgoingChunk::File {
                path, file_name, ..
            } => Delivered::File {
                file_name,
                contents: tokio::fs::read(&path).await?,
            },
        };
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(entry);
        }
        if self.fail {
            return Err(VpsError::Delivery("sink configured to fail".into()));
        }
        Ok(())
    }
}

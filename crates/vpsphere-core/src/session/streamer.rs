//! Turns a process's merged output into chat-sized chunks.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::buffer::OutputBuffer;
use super::spillover::deliver_tail;
use super::SessionKey;
use crate::escape::code_block;
use crate::sink::{OutgoingChunk, OutputSink};

/// Counters for one streamed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Raw bytes read from the process.
    pub bytes: usize,
    /// Chunks handed to the sink, including the final one.
    pub chunks: usize,
    /// Deliveries the sink reported as failed.
    pub failed: usize,
}

/// Buffers decoded output and flushes whenever it outgrows `threshold`.
///
/// Each flush is escaped on its own, after the buffer for that flush is
/// complete, so escapes never straddle two chunks. The remainder at end of
/// stream goes through [`deliver_tail`] because it is not threshold-bound.
pub struct ChunkedOutputStreamer<'a> {
    key: SessionKey,
    threshold: usize,
    message_limit: usize,
    sink: &'a dyn OutputSink,
    buffer: OutputBuffer,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last push.
    pending: Vec<u8>,
    summary: StreamSummary,
}

impl<'a> ChunkedOutputStreamer<'a> {
    pub fn new(
        key: SessionKey,
        threshold: usize,
        message_limit: usize,
        sink: &'a dyn OutputSink,
    ) -> Self {
        Self {
            key,
            threshold,
            message_limit,
            sink,
            buffer: OutputBuffer::new(),
            pending: Vec::new(),
            summary: StreamSummary::default(),
        }
    }

    /// Decode `bytes` (invalid sequences become U+FFFD) and buffer them,
    /// flushing if the threshold is crossed. A character cut off at the end
    /// of `bytes` is completed by the next push.
    pub async fn push(&mut self, bytes: &[u8]) {
        self.summary.bytes += bytes.len();
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);
        let (text, rest) = decode_complete(&data);
        self.pending = rest.to_vec();
        if !text.is_empty() {
            self.buffer.push(text);
        }
        if self.buffer.exceeds(self.threshold) {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        let text = self.buffer.take();
        let rendered = code_block(&text);
        // Escaping can take a flush past the transport's message limit.
        let rendered_len = rendered.chars().count();
        debug!(key = %self.key, len = text.chars().count(), rendered_len, "flushing output chunk");
        let chunk = OutgoingChunk::markdown(self.key, rendered);
        self.summary.chunks += 1;
        if let Err(e) = self.sink.deliver(chunk).await {
            self.summary.failed += 1;
            warn!(key = %self.key, rendered_len, error = %e, "output chunk not delivered");
        }
    }

    /// Deliver whatever is left and return the counters.
    pub async fn finish(mut self) -> StreamSummary {
        if !self.pending.is_empty() {
            let leftover = std::mem::take(&mut self.pending);
            self.buffer.push(String::from_utf8_lossy(&leftover).into_owned());
        }
        if !self.buffer.is_empty() {
            let tail = self.buffer.take();
            if !tail.trim().is_empty() {
                self.summary.chunks += 1;
            }
            if let Err(e) = deliver_tail(self.key, &tail, self.message_limit, self.sink).await {
                self.summary.failed += 1;
                warn!(key = %self.key, error = %e, "final output not delivered");
            }
        }
        self.summary
    }

    /// Consume `output` until every sender is gone, then finish.
    pub async fn run(mut self, output: &mut mpsc::Receiver<Vec<u8>>) -> StreamSummary {
        while let Some(fragment) = output.recv().await {
            self.push(&fragment).await;
        }
        self.finish().await
    }
}

/// Decode the longest prefix of `data` that ends on a character boundary,
/// substituting U+FFFD for invalid sequences. Returns the text and the
/// bytes of a trailing sequence that may still be completed.
fn decode_complete(data: &[u8]) -> (String, &[u8]) {
    let mut out = String::with_capacity(data.len());
    let mut rest = data;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return (out, &[] as &[u8]);
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => return (out, after),
                }
            }
        }
    }
}

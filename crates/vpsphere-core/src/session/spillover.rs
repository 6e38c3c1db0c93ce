//! Final-flush delivery: inline text, or a file when the tail is too long.

use std::io::Write;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::SessionKey;
use crate::error::{VpsError, VpsResult};
use crate::escape::code_block;
use crate::sink::{OutgoingChunk, OutputSink};

/// Name the spilled artifact is presented under.
pub const SPILLOVER_FILE_NAME: &str = "output.txt";

/// Deliver the leftover output of a finished stream.
///
/// Surrounding whitespace is trimmed first; nothing is sent if nothing is
/// left. Up to `limit` characters go out as one escaped text chunk. Longer
/// tails are written raw to a temporary file which is handed to the sink and
/// removed afterwards, whether or not delivery succeeded.
pub async fn deliver_tail(
    key: SessionKey,
    tail: &str,
    limit: usize,
    sink: &dyn OutputSink,
) -> VpsResult<()> {
    let tail = tail.trim();
    if tail.is_empty() {
        return Ok(());
    }

    let len = tail.chars().count();
    if len <= limit {
        return sink.deliver(OutgoingChunk::markdown(key, code_block(tail))).await;
    }

    debug!(key = %key, len, limit, "spilling output to file");
    let artifact = write_artifact(tail.to_owned()).await?;
    let result = sink
        .deliver(OutgoingChunk::File {
            key,
            path: artifact.path().to_path_buf(),
            file_name: SPILLOVER_FILE_NAME.to_string(),
        })
        .await;

    if let Err(e) = artifact.close() {
        warn!(error = %e, "failed to remove spillover file");
    }
    result
}

async fn write_artifact(contents: String) -> VpsResult<NamedTempFile> {
    tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("vpsphere-output-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(|e| VpsError::Other(format!("join error: {e}")))?
    .map_err(VpsError::Io)
}

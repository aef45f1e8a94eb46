// ABOUTME: Write side of a submission output stream
// ABOUTME: Sends display chunks and the terminal result frame, surfacing consumer disconnects as errors

use thiserror::Error;
use tokio::sync::mpsc;

use crate::framing::{encode_result, SubmissionResult};

/// The stream consumer went away. Once this surfaces, the run is cancelled
/// and nothing further should be emitted.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("submission stream consumer disconnected")]
pub struct EmitterClosed;

/// Sends submission output to whoever is streaming the response. Chunks are
/// forwarded as-is; the result frame is encoded on the way out.
#[derive(Debug, Clone)]
pub struct StreamEmitter {
    tx: mpsc::Sender<String>,
}

impl StreamEmitter {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Forwards a display chunk. Errors only when the consumer dropped the
    /// receiving end.
    pub async fn text(&self, chunk: impl Into<String>) -> Result<(), EmitterClosed> {
        self.tx.send(chunk.into()).await.map_err(|_| EmitterClosed)
    }

    /// Appends the terminal result frame to the stream.
    pub async fn result(&self, result: &SubmissionResult) -> Result<(), EmitterClosed> {
        self.text(encode_result(result)).await
    }
}

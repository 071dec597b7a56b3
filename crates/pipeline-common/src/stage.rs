//! The byte-stream stage abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::PipelineError;

/// Channel endpoints handed to a running stage.
///
/// `input` yields the chunks written by the previous stage and ends when that
/// stage is done. Dropping `output` signals end-of-stream to the next stage.
/// `token` is cancelled when the chain is torn down.
pub struct StageIo {
    pub input: mpsc::Receiver<Bytes>,
    pub output: mpsc::Sender<Bytes>,
    pub token: CancellationToken,
}

/// One stage of a byte-stream chain.
///
/// A stage consumes its input channel, writes to its output channel in order,
/// and returns once it has nothing more to emit. Returning an error fails the
/// whole chain; the error is reported at most once through the chain's
/// [`FailureFunnel`](crate::FailureFunnel).
#[async_trait]
pub trait Stage: Send + 'static {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn run(self: Box<Self>, io: StageIo) -> Result<(), PipelineError>;
}

/// Send a chunk downstream unless the chain is being torn down.
///
/// Returns `false` when the chunk could not be delivered, either because the
/// token was cancelled or because the downstream receiver is gone.
pub async fn forward(
    output: &mpsc::Sender<Bytes>,
    chunk: Bytes,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = output.send(chunk) => sent.is_ok(),
    }
}

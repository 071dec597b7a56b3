use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{CancellationToken, PipelineError, Stage, StageIo};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Collect everything a receiver yields into one buffer.
pub async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk);
    }
    out
}

/// Run a single stage over `input` and return its output and result.
pub async fn run_stage<S: Stage>(
    stage: S,
    input: Vec<Bytes>,
) -> (Vec<u8>, Result<(), PipelineError>) {
    run_stage_with_token(stage, input, CancellationToken::new()).await
}

pub async fn run_stage_with_token<S: Stage>(
    stage: S,
    input: Vec<Bytes>,
    token: CancellationToken,
) -> (Vec<u8>, Result<(), PipelineError>) {
    let (in_tx, in_rx) = mpsc::channel(4);
    let (out_tx, out_rx) = mpsc::channel(4);

    let feeder = tokio::spawn(async move {
        for chunk in input {
            if in_tx.send(chunk).await.is_err() {
                break;
            }
        }
    });
    let collector = tokio::spawn(drain(out_rx));

    let result = Box::new(stage)
        .run(StageIo {
            input: in_rx,
            output: out_tx,
            token,
        })
        .await;

    feeder.abort();
    let out = collector.await.unwrap_or_default();
    (out, result)
}

//! Handle to a started pipeline.

use std::sync::Arc;

use bytes::Bytes;
use pipeline_common::{FailureFunnel, SpawnedPipeline, settle};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::UsedEngine;
use crate::{Error, Result};

/// Size of the reads [`RunningPipeline::process`] feeds the chain with.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A running stage chain.
///
/// Bytes written with [`write`](Self::write) flow through every stage and come
/// out of [`next_chunk`](Self::next_chunk). Once the output ends, the stage
/// tasks are settled and at most one failure is returned. Dropping the handle
/// cancels the chain and kills any engine process still running.
pub struct RunningPipeline {
    input: Option<mpsc::Sender<Bytes>>,
    output: mpsc::Receiver<Bytes>,
    tasks: Vec<JoinHandle<()>>,
    funnel: Arc<FailureFunnel>,
    token: CancellationToken,
    content_type: Option<String>,
    used_engines: Vec<UsedEngine>,
    finished: bool,
}

impl RunningPipeline {
    pub(crate) fn new(
        spawned: SpawnedPipeline,
        token: CancellationToken,
        content_type: Option<String>,
        used_engines: Vec<UsedEngine>,
    ) -> Self {
        Self {
            input: Some(spawned.input_tx),
            output: spawned.output_rx,
            tasks: spawned.tasks,
            funnel: spawned.funnel,
            token,
            content_type,
            used_engines,
            finished: false,
        }
    }

    /// Content type of the output, when known.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn used_engines(&self) -> &[UsedEngine] {
        &self.used_engines
    }

    /// Feed one chunk into the chain.
    ///
    /// Returns `false` once the chain no longer accepts input: the input was
    /// ended, the chain failed or it was cancelled. Rejected chunks are dropped.
    pub async fn write(&mut self, chunk: Bytes) -> bool {
        let Some(input) = self.input.as_ref() else {
            return false;
        };
        send_input(input, chunk, &self.token).await
    }

    /// Signal that no more input will be written.
    pub fn end_input(&mut self) {
        self.input = None;
    }

    /// Next output chunk, `None` once the output has ended.
    ///
    /// After the last chunk the chain's outcome is returned: the first stage
    /// failure if any stage failed, [`Error::Cancelled`] if the chain was
    /// cancelled before finishing.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        if let Some(chunk) = self.output.recv().await {
            return Ok(Some(chunk));
        }

        self.finished = true;
        self.input = None;
        let tasks = std::mem::take(&mut self.tasks);
        settle(tasks, &self.funnel).await.map_err(Error::from)?;
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(None)
    }

    /// Tear the chain down. Engine processes are killed.
    pub fn cancel(&mut self) {
        debug!("Cancelling pipeline");
        self.input = None;
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stream `reader` through the chain into `writer`.
    ///
    /// Returns the number of bytes written.
    pub async fn process<R, W>(mut self, mut reader: R, mut writer: W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let input = self.input.take();
        let token = self.token.clone();

        let feed = async {
            let Some(input) = input else {
                return Ok(());
            };
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = match reader.read(&mut buffer).await {
                    Ok(n) => n,
                    Err(e) => {
                        token.cancel();
                        return Err(Error::Io(e));
                    }
                };
                if n == 0 || !send_input(&input, Bytes::copy_from_slice(&buffer[..n]), &token).await
                {
                    return Ok(());
                }
            }
        };

        let drain = async {
            let result = async {
                let mut written = 0u64;
                while let Some(chunk) = self.next_chunk().await? {
                    writer.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                writer.flush().await?;
                Ok::<u64, Error>(written)
            }
            .await;
            if result.is_err() {
                token.cancel();
            }
            result
        };

        let (fed, drained) = tokio::join!(feed, drain);
        fed?;
        drained
    }

    /// Run `input` through the chain and collect the whole output.
    pub async fn transform(self, input: Bytes) -> Result<Bytes> {
        let mut output = Vec::new();
        self.process(input.as_ref(), &mut output).await?;
        Ok(Bytes::from(output))
    }
}

async fn send_input(input: &mpsc::Sender<Bytes>, chunk: Bytes, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = input.send(chunk) => sent.is_ok(),
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if !self.finished {
            self.token.cancel();
        }
    }
}

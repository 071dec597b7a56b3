//! # Channel-Based Stage Chain
//!
//! Runs each stage in its own task, connected by bounded channels. Stage `i`
//! writes into stage `i + 1`, the caller writes into stage 0 and reads from the
//! last stage. Bounded channels give end-to-end backpressure.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{DEFAULT_CHANNEL_CAPACITY, FailureFunnel, PipelineError, Stage, StageIo};

/// A chain of byte-stream stages.
pub struct ChannelPipeline {
    stages: Vec<Box<dyn Stage>>,
    token: CancellationToken,
    channel_size: usize,
}

/// Result of spawning a pipeline
pub struct SpawnedPipeline {
    pub input_tx: mpsc::Sender<Bytes>,
    pub output_rx: mpsc::Receiver<Bytes>,
    pub tasks: Vec<JoinHandle<()>>,
    pub funnel: Arc<FailureFunnel>,
}

impl ChannelPipeline {
    /// Create an empty chain torn down by `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            stages: Vec::new(),
            token,
            channel_size: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the channel size for connections between stages.
    pub fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = size.max(1);
        self
    }

    /// Add a stage to the end of the chain.
    pub fn add_stage<S: Stage>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push_stage(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Spawn one task per stage and return the chain's endpoints.
    ///
    /// Each task keeps a clone of its output sender until after any failure
    /// has been reported, so the next stage can only observe end-of-stream
    /// once the funnel already knows why the stream ended.
    pub fn spawn(self) -> SpawnedPipeline {
        let funnel = Arc::new(FailureFunnel::new(self.token.clone()));
        let mut tasks = Vec::with_capacity(self.stages.len());

        let (input_tx, mut current_rx) = mpsc::channel::<Bytes>(self.channel_size);

        for (index, stage) in self.stages.into_iter().enumerate() {
            let (next_tx, next_rx) = mpsc::channel::<Bytes>(self.channel_size);
            let stage_name = stage.name().to_string();
            let token = self.token.clone();
            let funnel = funnel.clone();
            let input = current_rx;

            let task = tokio::spawn(async move {
                let end_guard = next_tx.clone();
                let io = StageIo {
                    input,
                    output: next_tx,
                    token,
                };

                debug!(stage = %stage_name, index, "Stage started");
                match AssertUnwindSafe(stage.run(io)).catch_unwind().await {
                    Ok(Ok(())) => debug!(stage = %stage_name, index, "Stage finished"),
                    Ok(Err(e)) => {
                        funnel.report(&stage_name, e);
                    }
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        funnel.report(
                            &stage_name,
                            PipelineError::StagePanicked {
                                stage: stage_name.clone(),
                                message,
                            },
                        );
                    }
                }
                drop(end_guard);
            });

            tasks.push(task);
            current_rx = next_rx;
        }

        SpawnedPipeline {
            input_tx,
            output_rx: current_rx,
            tasks,
            funnel,
        }
    }
}

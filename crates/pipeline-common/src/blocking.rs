//! In-process transform stage.
//!
//! Library-backed engines need the complete encoded image before they can do
//! anything, so this stage buffers its whole input, runs the transform on the
//! blocking thread pool (keeping the async workers free), and then streams
//! the result downstream in bounded chunks.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::{PipelineError, Stage, StageIo, forward};

/// Size of the chunks the transformed output is emitted in.
const OUTPUT_CHUNK_SIZE: usize = 64 * 1024;

type TransformFn = Box<dyn FnOnce(Bytes) -> Result<Bytes, PipelineError> + Send + 'static>;

pub struct BlockingTransformStage {
    name: String,
    transform: TransformFn,
}

impl BlockingTransformStage {
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: FnOnce(Bytes) -> Result<Bytes, PipelineError> + Send + 'static,
    {
        Self {
            name: name.into(),
            transform: Box::new(transform),
        }
    }
}

#[async_trait]
impl Stage for BlockingTransformStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<(), PipelineError> {
        let mut buffer = BytesMut::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = io.token.cancelled() => return Err(PipelineError::Cancelled),
                chunk = io.input.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };
            buffer.extend_from_slice(&chunk);
        }

        let name = self.name;
        let input = buffer.freeze();
        debug!(stage = %name, input_bytes = input.len(), "Running in-process transform");

        let transform = self.transform;
        let handle = tokio::task::spawn_blocking(move || transform(input));
        let output = tokio::select! {
            biased;
            _ = io.token.cancelled() => return Err(PipelineError::Cancelled),
            joined = handle => joined.map_err(|e| PipelineError::StagePanicked {
                stage: name.clone(),
                message: e.to_string(),
            })??,
        };

        debug!(stage = %name, output_bytes = output.len(), "In-process transform done");
        let mut offset = 0;
        while offset < output.len() {
            let end = (offset + OUTPUT_CHUNK_SIZE).min(output.len());
            if !forward(&io.output, output.slice(offset..end), &io.token).await {
                break;
            }
            offset = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancellationToken;
    use crate::test_utils::{run_stage, run_stage_with_token};

    #[tokio::test]
    async fn transforms_whole_input() {
        let stage = BlockingTransformStage::new("reverse", |input: Bytes| {
            let mut v = input.to_vec();
            v.reverse();
            Ok(Bytes::from(v))
        });
        let input = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")];
        let (out, result) = run_stage(stage, input).await;
        assert!(result.is_ok());
        assert_eq!(out, b"fedcba");
    }

    #[tokio::test]
    async fn large_output_is_chunked_but_complete() {
        let stage = BlockingTransformStage::new("grow", |_input: Bytes| {
            Ok(Bytes::from(vec![7u8; OUTPUT_CHUNK_SIZE * 3 + 5]))
        });
        let (out, result) = run_stage(stage, vec![Bytes::from_static(b"x")]).await;
        assert!(result.is_ok());
        assert_eq!(out.len(), OUTPUT_CHUNK_SIZE * 3 + 5);
    }

    #[tokio::test]
    async fn transform_error_is_returned() {
        let stage = BlockingTransformStage::new("broken", |_input: Bytes| {
            Err(PipelineError::strategy(std::io::Error::other("bad image")))
        });
        let (out, result) = run_stage(stage, vec![Bytes::from_static(b"x")]).await;
        assert!(out.is_empty());
        assert_eq!(result.unwrap_err().to_string(), "bad image");
    }

    #[tokio::test]
    async fn cancellation_before_input_ends() {
        let token = CancellationToken::new();
        token.cancel();
        let stage = BlockingTransformStage::new("idle", |input: Bytes| Ok(input));
        let (out, result) = run_stage_with_token(stage, Vec::new(), token).await;
        assert!(out.is_empty());
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}

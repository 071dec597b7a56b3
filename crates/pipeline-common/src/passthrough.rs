//! A stage that forwards its input unchanged.

use async_trait::async_trait;

use crate::{PipelineError, Stage, StageIo, forward};

/// Forwards every chunk as-is.
///
/// Used as the terminal stage of every chain so the caller always reads from
/// the same kind of endpoint, and as the whole chain when no operation was
/// requested.
#[derive(Debug, Default)]
pub struct PassThroughStage {
    name: Option<String>,
}

impl PassThroughStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

#[async_trait]
impl Stage for PassThroughStage {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("passthrough")
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<(), PipelineError> {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = io.token.cancelled() => return Ok(()),
                chunk = io.input.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            if !forward(&io.output, chunk, &io.token).await {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_stage;
    use bytes::Bytes;

    #[tokio::test]
    async fn forwards_bytes_unchanged() {
        let input = vec![Bytes::from_static(b"\x89PNG"), Bytes::from_static(b"\r\n\x1a\n")];
        let (out, result) = run_stage(PassThroughStage::new(), input).await;
        assert!(result.is_ok());
        assert_eq!(out, b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn names() {
        assert_eq!(PassThroughStage::new().name(), "passthrough");
        assert_eq!(PassThroughStage::named("output").name(), "output");
    }
}

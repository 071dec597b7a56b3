//! Single-point failure reporting for a stage chain.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::PipelineError;

/// Collects stage failures and keeps only the first one.
///
/// The first report cancels the chain's token, which tears down every stage
/// (including any child process). Later reports are logged and dropped, so a
/// chain surfaces at most one failure no matter how many stages fail.
#[derive(Debug)]
pub struct FailureFunnel {
    failed: AtomicBool,
    failure: Mutex<Option<PipelineError>>,
    token: CancellationToken,
}

impl FailureFunnel {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            token,
        }
    }

    /// Report a stage failure. Returns `true` if this was the first one.
    pub fn report(&self, stage: &str, err: PipelineError) -> bool {
        if self.failed.swap(true, Ordering::AcqRel) {
            warn!(stage, error = %err, "Suppressing secondary pipeline failure");
            return false;
        }

        error!(stage, error = %err, "Pipeline stage failed");
        *self.failure.lock() = Some(err);
        self.token.cancel();
        true
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Take the recorded failure. Only the first call can return it.
    pub fn take(&self) -> Option<PipelineError> {
        self.failure.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_wins_and_cancels() {
        let token = CancellationToken::new();
        let funnel = FailureFunnel::new(token.clone());

        assert!(!funnel.has_failed());
        let first = PipelineError::EmptyOutput {
            command: "gm convert".to_string(),
            context: None,
        };
        assert!(funnel.report("gm", first));
        assert!(token.is_cancelled());
        assert!(!funnel.report("jpegtran", PipelineError::Cancelled));

        match funnel.take() {
            Some(PipelineError::EmptyOutput { command, .. }) => assert_eq!(command, "gm convert"),
            other => panic!("expected first failure, got {other:?}"),
        }
        assert!(funnel.take().is_none());
        assert!(funnel.has_failed());
    }
}

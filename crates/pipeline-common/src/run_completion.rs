use tokio::task::JoinHandle;
use tracing::debug;

use crate::{FailureFunnel, PipelineError};

/// Wait for every stage task and resolve the chain's outcome.
///
/// Semantics:
/// - A task that panicked outside the stage body is reported like any other
///   stage failure (and suppressed if something failed before it).
/// - The funnel's first failure, if any, is returned; otherwise `Ok(())`.
/// - Only the first call can observe the failure.
pub async fn settle(
    tasks: Vec<JoinHandle<()>>,
    funnel: &FailureFunnel,
) -> Result<(), PipelineError> {
    for task in tasks {
        match task.await {
            Ok(()) => {}
            Err(join_error) if join_error.is_cancelled() => {
                debug!("Stage task was aborted");
            }
            Err(join_error) => {
                funnel.report(
                    "pipeline",
                    PipelineError::StagePanicked {
                        stage: "pipeline".to_string(),
                        message: join_error.to_string(),
                    },
                );
            }
        }
    }

    match funnel.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

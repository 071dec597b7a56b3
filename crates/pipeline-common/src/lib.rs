//! # Pipeline Common
//!
//! Byte-stream building blocks for image transformation pipelines.
//!
//! ## Features
//!
//! - [`Stage`]: one asynchronous byte-stream stage (an engine run, a pass-through, ...)
//! - [`ChannelPipeline`]: chains stages with bounded channels and funnels every
//!   stage failure into a single [`FailureFunnel`]
//! - [`ProcessStage`]: runs an external executable as a stage, feeding it on
//!   stdin and forwarding its stdout
//! - [`BlockingTransformStage`]: buffers the whole input and runs an in-process
//!   transform on the blocking thread pool
//!
//! ## License
//!
//! MIT License
//!

use thiserror::Error;

pub mod blocking;
pub mod channel_pipeline;
pub mod funnel;
pub mod passthrough;
pub mod process_stage;
mod record_reader;
mod run_completion;
pub mod stage;

#[cfg(test)]
mod test_utils;

/// Re-export key traits and types
pub use blocking::BlockingTransformStage;
pub use channel_pipeline::{ChannelPipeline, SpawnedPipeline};
pub use funnel::FailureFunnel;
pub use passthrough::PassThroughStage;
pub use process_stage::{ErrorLineFilter, ProcessStage, ProcessState};
pub use record_reader::OutputRecordReader;
pub use run_completion::settle;
pub use stage::{Stage, StageIo, forward};
pub use tokio_util::sync::CancellationToken;

/// Default capacity for channels between stages
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Exit code reported for a child process that was terminated by a signal
/// and therefore has no exit status of its own.
pub const KILLED_BY_SIGNAL: i32 = -1;

/// Common error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation was cancelled")]
    Cancelled,

    /// Failure raised by an in-process stage; the boxed error keeps its
    /// concrete type so callers can downcast it.
    #[error("{0}")]
    Strategy(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An external process could not be started or ended abnormally.
    #[error("{}", describe_execution(.command, .exit_code, .context, .source))]
    Execution {
        command: String,
        /// `None` when the process never ran; [`KILLED_BY_SIGNAL`] when it
        /// was terminated by a signal.
        exit_code: Option<i32>,
        /// Last diagnostic line the process wrote to stderr.
        context: Option<String>,
        #[source]
        source: Option<std::io::Error>,
    },

    /// An external process terminated without writing a single byte.
    #[error("{command} produced no output{}", context_suffix(.context))]
    EmptyOutput {
        command: String,
        context: Option<String>,
    },

    #[error("Stage {stage} panicked: {message}")]
    StagePanicked { stage: String, message: String },
}

impl PipelineError {
    /// Wrap an arbitrary in-process failure.
    pub fn strategy(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Strategy(Box::new(error))
    }
}

fn context_suffix(context: &Option<String>) -> String {
    context
        .as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

fn describe_execution(
    command: &str,
    exit_code: &Option<i32>,
    context: &Option<String>,
    source: &Option<std::io::Error>,
) -> String {
    let head = match (*exit_code, source) {
        (Some(KILLED_BY_SIGNAL), _) => format!("{command} was terminated by a signal"),
        (Some(code), _) => format!("{command} exited with code {code}"),
        (None, Some(err)) => format!("failed to run {command}: {err}"),
        (None, None) => format!("{command} failed"),
    };
    format!("{head}{}", context_suffix(context))
}

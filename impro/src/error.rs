//! Error types for image pipelines.

use pipeline_common::PipelineError;
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminator for [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Operation,
    Assignment,
    ArgumentCount,
    Execution,
    EmptyOutput,
    DimensionLimit,
    Frozen,
    Configuration,
    Io,
    Serialization,
    Image,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum Error {
    /// The operation is unknown, or no engine accepts its arguments.
    #[error("Invalid operation {name}: {reason}")]
    Operation { name: String, reason: String },

    /// No registered, enabled, type-compatible engine can run a sequence.
    #[error("No engine can carry out the sequence: {}", .operations.join(", "))]
    Assignment { operations: Vec<String> },

    /// An explicit engine selection carried more than one argument.
    #[error("Engine {engine} takes at most one configuration argument, got {count}")]
    ArgumentCount { engine: String, count: usize },

    /// An engine failed while processing.
    #[error("{message}")]
    Execution {
        message: String,
        command: Option<String>,
        exit_code: Option<i32>,
        context: Option<String>,
        /// Why the engine could not be started.
        #[source]
        source: Option<std::io::Error>,
    },

    /// An engine finished without producing a single byte.
    #[error("{command} produced no output{}", context_suffix(.context))]
    EmptyOutput {
        command: String,
        context: Option<String>,
    },

    #[error("Output size {width}x{height} exceeds the limit of {max_pixels} pixels")]
    DimensionLimit {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("Operations cannot be added once engines have been assigned")]
    Frozen,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Pipeline was cancelled")]
    Cancelled,
}

impl Error {
    pub fn operation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Operation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Operation { .. } => ErrorKind::Operation,
            Self::Assignment { .. } => ErrorKind::Assignment,
            Self::ArgumentCount { .. } => ErrorKind::ArgumentCount,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::EmptyOutput { .. } => ErrorKind::EmptyOutput,
            Self::DimensionLimit { .. } => ErrorKind::DimensionLimit,
            Self::Frozen => ErrorKind::Frozen,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Image(_) => ErrorKind::Image,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Exit status of the failed engine process, if there was one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Last diagnostic line the failed engine wrote, if any.
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Execution { context, .. } | Self::EmptyOutput { context, .. } => {
                context.as_deref()
            }
            _ => None,
        }
    }
}

impl From<PipelineError> for Error {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Io(e) => Self::Io(e),
            PipelineError::Cancelled => Self::Cancelled,
            PipelineError::Strategy(inner) => match inner.downcast::<Error>() {
                Ok(err) => *err,
                Err(inner) => match inner.downcast::<image::ImageError>() {
                    Ok(err) => Self::Image(*err),
                    Err(inner) => Self::Execution {
                        message: inner.to_string(),
                        command: None,
                        exit_code: None,
                        context: None,
                        source: None,
                    },
                },
            },
            PipelineError::Execution {
                command,
                exit_code,
                context,
                source,
            } => Self::Execution {
                message,
                command: Some(command),
                exit_code,
                context,
                source,
            },
            PipelineError::EmptyOutput { command, context } => {
                Self::EmptyOutput { command, context }
            }
            PipelineError::StagePanicked { .. } => Self::Execution {
                message,
                command: None,
                exit_code: None,
                context: None,
                source: None,
            },
        }
    }
}

fn context_suffix(context: &Option<String>) -> String {
    context
        .as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::EmptyOutput.to_string(), "empty_output");
        assert_eq!(Error::Frozen.kind().as_ref(), "frozen");
        assert_eq!(
            Error::operation("foo", "unsupported").kind(),
            ErrorKind::Operation
        );
    }

    #[test]
    fn test_execution_error_is_flattened() {
        let err: Error = PipelineError::Execution {
            command: "gm convert - png:-".to_string(),
            exit_code: Some(1),
            context: Some("no decode delegate".to_string()),
            source: None,
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.context(), Some("no decode delegate"));
        assert_eq!(
            err.to_string(),
            "gm convert - png:- exited with code 1 (no decode delegate)"
        );
    }

    #[test]
    fn test_boxed_crate_error_is_recovered() {
        let boxed = PipelineError::strategy(Error::DimensionLimit {
            width: 4000,
            height: 4000,
            max_pixels: 1_000_000,
        });
        let err: Error = boxed.into();
        assert_eq!(err.kind(), ErrorKind::DimensionLimit);
    }

    #[test]
    fn test_spawn_failure_keeps_its_cause() {
        use std::error::Error as _;

        let err: Error = PipelineError::Execution {
            command: "gifsicle".to_string(),
            exit_code: None,
            context: None,
            source: Some(std::io::Error::from(std::io::ErrorKind::NotFound)),
        }
        .into();

        let cause = err
            .source()
            .and_then(|e| e.downcast_ref::<std::io::Error>())
            .map(std::io::Error::kind);
        assert_eq!(cause, Some(std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_empty_output_and_cancellation() {
        let err: Error = PipelineError::EmptyOutput {
            command: "pngquant -".to_string(),
            context: None,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::EmptyOutput);
        assert_eq!(err.to_string(), "pngquant - produced no output");

        let err: Error = PipelineError::EmptyOutput {
            command: "gm convert - png:-".to_string(),
            context: Some("no decode delegate".to_string()),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "gm convert - png:- produced no output (no decode delegate)"
        );

        let err: Error = PipelineError::Cancelled.into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}

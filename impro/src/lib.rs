//! # impro
//!
//! Declarative image operation pipelines.
//!
//! A caller queues operations (`resize`, `crop`, `png`, `metadata`, ...) on a
//! [`Pipeline`]. When the pipeline is flushed, contiguous runs of operations
//! are assigned to the registered engines able to carry them out, given the
//! media type at that point of the queue. Each engine contributes one or more
//! byte-stream stages (an external process or an in-process transform), and
//! the stages are chained into a single streaming [`RunningPipeline`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use impro::{EngineRegistry, ImproConfig, Operation, Pipeline, PipelineOptions};
//!
//! # async fn run(input: bytes::Bytes) -> impro::Result<()> {
//! let registry = Arc::new(EngineRegistry::with_defaults(&ImproConfig::default())?);
//! let mut pipeline = Pipeline::new(registry, PipelineOptions::default().with_source_type("jpeg"));
//! pipeline
//!     .add(Operation::new("resize", vec![120.into(), 80.into()]))?
//!     .add(Operation::type_selector("png"))?;
//! let output = pipeline.spawn()?.transform(input).await?;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engines;
pub mod error;
pub mod operation;
pub mod pipeline;
pub mod query;
pub mod registry;

#[cfg(test)]
mod test_utils;

pub use pipeline_common::{BlockingTransformStage, PassThroughStage, ProcessStage, Stage};

pub use config::{ImproConfig, PipelineOptions};
pub use error::{Error, ErrorKind, Result};
pub use operation::{Arg, Operation};
pub use pipeline::{Assignment, Pipeline, RunningPipeline, UsedEngine, assign};
pub use query::ParsedQuery;
pub use registry::{Engine, EngineDescriptor, EngineRegistry, EngineRun};

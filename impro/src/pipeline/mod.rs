//! Per-request operation queue.
//!
//! A [`Pipeline`] collects operations, validating each one as it is added.
//! [`Pipeline::flush`] freezes the queue, assigns every run to an engine and
//! lets each engine contribute its stages. [`Pipeline::spawn`] then starts the
//! stage chain and returns a [`RunningPipeline`].

mod assign;
mod running;

use std::sync::Arc;

use pipeline_common::{ChannelPipeline, PassThroughStage, Stage};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PipelineOptions;
use crate::operation::{Arg, Operation};
use crate::registry::{EngineRegistry, EngineRun};
use crate::{Error, Result};

pub use assign::{Assignment, assign};
pub use running::RunningPipeline;

/// An engine bound to one run of the queue, as recorded by [`Pipeline::flush`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedEngine {
    pub name: String,
    /// The run, including a leading explicit engine selection.
    pub operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_args: Option<Vec<String>>,
}

pub struct Pipeline {
    registry: Arc<EngineRegistry>,
    options: PipelineOptions,
    operations: Vec<Operation>,
    source_type: Option<String>,
    target_type: Option<String>,
    target_content_type: Option<String>,
    frozen: bool,
    used_engines: Option<Vec<UsedEngine>>,
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("operations", &self.operations)
            .field("source_type", &self.source_type)
            .field("target_type", &self.target_type)
            .field("frozen", &self.frozen)
            .field("used_engines", &self.used_engines)
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new(registry: Arc<EngineRegistry>, options: PipelineOptions) -> Self {
        let source_type = options
            .source_type
            .as_deref()
            .map(|t| media_types::canonical_name(t).unwrap_or(t).to_string());
        let target_content_type = source_type
            .as_deref()
            .and_then(media_types::content_type_for)
            .map(str::to_string);

        Self {
            registry,
            options,
            operations: Vec::new(),
            target_type: source_type.clone(),
            source_type,
            target_content_type,
            frozen: false,
            used_engines: None,
            stages: Vec::new(),
        }
    }

    /// Queue an operation after validating it.
    pub fn add(&mut self, operation: Operation) -> Result<&mut Self> {
        if self.frozen {
            return Err(Error::Frozen);
        }

        let operation = self.normalize(operation)?;
        self.validate(&operation)?;

        if self.registry.is_type_selector(&operation.name) {
            self.target_type = Some(operation.name.clone());
            self.target_content_type =
                media_types::content_type_for(&operation.name).map(str::to_string);
        }

        debug!(operation = %operation, "Queued operation");
        self.operations.push(operation);
        Ok(self)
    }

    pub fn add_all<I>(&mut self, operations: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = Operation>,
    {
        for operation in operations {
            self.add(operation)?;
        }
        Ok(self)
    }

    /// Queue the operations of a declarative query and return the part of the
    /// query that was not understood.
    pub fn add_query(&mut self, query: &str) -> Result<String> {
        let parsed = crate::query::parse(query, &self.registry);
        self.add_all(parsed.operations)?;
        Ok(parsed.leftover)
    }

    /// Rewrite `type=<name>` and type aliases to canonical type selectors.
    fn normalize(&self, operation: Operation) -> Result<Operation> {
        if operation.name == "type" && !self.registry.supports_operation("type") {
            let [Arg::Str(type_name)] = operation.args.as_slice() else {
                return Err(Error::operation(
                    "type",
                    "expected exactly one type name argument",
                ));
            };
            return match media_types::canonical_name(type_name) {
                Some(canonical) => Ok(Operation::type_selector(canonical)),
                None => Err(Error::operation(
                    "type",
                    format!("unknown type {type_name}"),
                )),
            };
        }

        if !self.registry.supports_operation(&operation.name)
            && let Some(canonical) = media_types::canonical_name(&operation.name)
            && self.registry.supports_operation(canonical)
        {
            return Ok(Operation::new(canonical, operation.args));
        }
        Ok(operation)
    }

    fn validate(&self, operation: &Operation) -> Result<()> {
        let name = operation.name.as_str();
        if !self.registry.supports_operation(name) {
            return Err(Error::operation(name, "no registered engine supports it"));
        }

        if self.registry.is_engine(name) {
            if operation.args.len() > 1 {
                return Err(Error::ArgumentCount {
                    engine: name.to_string(),
                    count: operation.args.len(),
                });
            }
            return Ok(());
        }

        let accepted = self
            .registry
            .engines_supporting(name)
            .iter()
            .filter_map(|&index| self.registry.engine_at(index))
            .any(|engine| {
                engine
                    .validate_operation(name, &operation.args)
                    .unwrap_or(operation.args.is_empty())
            });
        if !accepted {
            return Err(Error::operation(
                name,
                "arguments are not valid for any engine supporting it",
            ));
        }

        if name == "resize" {
            self.check_resize_limit(&operation.args)?;
        }
        Ok(())
    }

    fn check_resize_limit(&self, args: &[Arg]) -> Result<()> {
        let Some(max_pixels) = self.options.max_output_pixels else {
            return Ok(());
        };
        let (Some(width), Some(height)) = (
            args.first().and_then(Arg::as_u32),
            args.get(1).and_then(Arg::as_u32),
        ) else {
            return Ok(());
        };

        let size = media_types::Dimensions::new(width, height);
        if size.fits(Some(max_pixels)) {
            Ok(())
        } else {
            Err(Error::DimensionLimit {
                width,
                height,
                max_pixels,
            })
        }
    }

    /// Assign every run of the queue to an engine and let each engine add its
    /// stages. Runs once; later calls return the same result.
    pub fn flush(&mut self) -> Result<&[UsedEngine]> {
        if self.used_engines.is_none() {
            self.frozen = true;
            let assignments = assign(
                &self.registry,
                &self.operations,
                self.source_type.as_deref(),
                &self.options.disabled,
            )?;

            match self.execute_assignments(&assignments) {
                Ok(used) => {
                    if let Some(last) = assignments.last() {
                        self.target_type = last.output_type.clone();
                        self.target_content_type = last
                            .output_type
                            .as_deref()
                            .and_then(media_types::content_type_for)
                            .map(str::to_string);
                    }
                    self.used_engines = Some(used);
                }
                Err(e) => {
                    self.stages.clear();
                    return Err(e);
                }
            }
        }
        Ok(self.used_engines.as_deref().unwrap_or_default())
    }

    fn execute_assignments(&mut self, assignments: &[Assignment]) -> Result<Vec<UsedEngine>> {
        let mut used = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let Some(engine) = self.registry.engine(&assignment.engine).cloned() else {
                return Err(Error::config(format!(
                    "engine {} is not registered",
                    assignment.engine
                )));
            };

            let run = EngineRun {
                engine: assignment.engine.clone(),
                operations: assignment.executed(&self.operations).to_vec(),
                options: assignment.options.clone(),
                range: assignment.range.clone(),
                input_type: assignment.input_type.clone(),
                output_type: assignment.output_type.clone(),
            };
            let stages_before = self.stages.len();
            let command_args = engine.execute(self, &run)?;
            if self.stages.len() == stages_before {
                return Err(Error::config(format!(
                    "engine {} did not add any stage",
                    assignment.engine
                )));
            }

            info!(
                engine = %assignment.engine,
                operations = run.operations.len(),
                input_type = ?run.input_type,
                output_type = ?run.output_type,
                "Assigned engine"
            );
            used.push(UsedEngine {
                name: assignment.engine.clone(),
                operations: self.operations[assignment.range.clone()].to_vec(),
                command_args,
            });
        }
        Ok(used)
    }

    /// Flush if needed, then start the stage chain.
    pub fn spawn(mut self) -> Result<RunningPipeline> {
        self.flush()?;

        let token = CancellationToken::new();
        let mut chain =
            ChannelPipeline::new(token.clone()).with_channel_size(self.options.channel_size);
        for stage in std::mem::take(&mut self.stages) {
            chain.push_stage(stage);
        }
        chain.push_stage(Box::new(PassThroughStage::named("output")));
        debug!(stages = ?chain.stage_names(), "Starting pipeline");

        Ok(RunningPipeline::new(
            chain.spawn(),
            token,
            self.target_content_type.take(),
            self.used_engines.take().unwrap_or_default(),
        ))
    }

    /// Append a stage. Called by engines from [`Engine::execute`](crate::Engine::execute).
    pub fn add_stage<S: Stage>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn source_type(&self) -> Option<&str> {
        self.source_type.as_deref()
    }

    pub fn target_type(&self) -> Option<&str> {
        self.target_type.as_deref()
    }

    pub fn target_content_type(&self) -> Option<&str> {
        self.target_content_type.as_deref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The engine assignments, once [`Pipeline::flush`] has succeeded.
    pub fn used_engines(&self) -> Option<&[UsedEngine]> {
        self.used_engines.as_deref()
    }
}

//! Engines and registries shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use impro::{
    Engine, EngineDescriptor, EngineRegistry, EngineRun, PassThroughStage, Pipeline,
    PipelineOptions, ProcessStage, Result,
};

/// Declares capabilities only; each run passes its bytes through unchanged.
pub struct DeclaredEngine {
    descriptor: EngineDescriptor,
}

impl DeclaredEngine {
    pub fn new(descriptor: EngineDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Engine for DeclaredEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, _name: &str, _args: &[impro::Arg]) -> Option<bool> {
        Some(true)
    }

    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>> {
        pipeline.add_stage(PassThroughStage::named(self.descriptor.name.clone()));
        Ok(Some(run.operations.iter().map(ToString::to_string).collect()))
    }
}

/// Runs a fixed command line for its single `run` operation.
pub struct CommandEngine {
    descriptor: EngineDescriptor,
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            descriptor: EngineDescriptor::new("tool")
                .operations(["run"])
                .input_types(["*"]),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl Engine for CommandEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn execute(&self, pipeline: &mut Pipeline, _run: &EngineRun) -> Result<Option<Vec<String>>> {
        pipeline.add_stage(
            ProcessStage::new(self.program.clone())
                .with_name("tool")
                .args(self.args.iter().cloned()),
        );
        Ok(Some(self.args.clone()))
    }
}

/// A general-purpose engine accepting anything.
pub fn general() -> EngineDescriptor {
    EngineDescriptor::new("general")
        .operations(["resize", "crop", "rotate", "blur", "metadata"])
        .input_types(["*"])
        .output_types(["jpeg", "png", "gif", "webp"])
}

/// A GIF-only specialist.
pub fn gif_only() -> EngineDescriptor {
    EngineDescriptor::new("gifonly")
        .operations(["resize", "rotate", "optimize"])
        .input_types(["gif"])
        .output_types(["gif"])
}

/// A vector renderer that converts to png by default.
pub fn vector() -> EngineDescriptor {
    EngineDescriptor::new("vector")
        .operations(["density"])
        .input_types(["svg"])
        .output_types(["png", "pdf"])
        .default_output_type("png")
}

pub fn registry(descriptors: Vec<EngineDescriptor>) -> Arc<EngineRegistry> {
    let builder = descriptors
        .into_iter()
        .fold(EngineRegistry::builder(), |builder, descriptor| {
            builder.register(DeclaredEngine::new(descriptor))
        });
    Arc::new(builder.build().unwrap())
}

pub fn command_pipeline(program: &str, args: &[&str]) -> Pipeline {
    let registry = EngineRegistry::builder()
        .register(CommandEngine::new(program, args))
        .build()
        .unwrap();
    let mut pipeline = Pipeline::new(Arc::new(registry), PipelineOptions::default());
    pipeline.add(impro::Operation::named("run")).unwrap();
    pipeline
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

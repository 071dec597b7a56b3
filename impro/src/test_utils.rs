use pipeline_common::PassThroughStage;

use crate::Result;
use crate::operation::Arg;
use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};

type Validator = fn(&str, &[Arg]) -> Option<bool>;

/// Engine that only declares capabilities; its runs pass bytes through.
pub struct StubEngine {
    descriptor: EngineDescriptor,
    validator: Option<Validator>,
}

impl StubEngine {
    pub fn new(descriptor: EngineDescriptor) -> Self {
        Self {
            descriptor,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }
}

impl Engine for StubEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        self.validator.and_then(|validate| validate(name, args))
    }

    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>> {
        pipeline.add_stage(PassThroughStage::named(self.descriptor.name.clone()));
        Ok(Some(run.operations.iter().map(ToString::to_string).collect()))
    }
}

/// Initialize tracing for tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

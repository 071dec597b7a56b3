//! `jpegtran`: lossless JPEG transforms.
//!
//! jpegtran honours a single geometric transform per invocation, so each
//! `rotate`, `flip`, `flop` or `extract` after the first starts another
//! process in the chain. Encoding switches apply to the last invocation.

use crate::operation::Arg;
use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};
use crate::Result;

const OPERATIONS: &[&str] = &[
    "rotate",
    "flip",
    "flop",
    "extract",
    "grayscale",
    "progressive",
    "optimize",
];

const COPY_MODES: &[&str] = &["none", "comments", "all"];

pub struct JpegtranEngine {
    descriptor: EngineDescriptor,
    program: String,
}

impl JpegtranEngine {
    pub fn new(program: &str) -> Self {
        Self {
            descriptor: EngineDescriptor::new("jpegtran")
                .operations(OPERATIONS.iter().copied())
                .input_types(["jpeg"])
                .output_types(["jpeg"])
                .unavailable(!super::binary_available("jpegtran", program)),
            program: program.to_string(),
        }
    }
}

fn transform_args(name: &str, args: &[Arg]) -> Option<Vec<String>> {
    let pair = |flag: &str, value: String| Some(vec![flag.to_string(), value]);
    match name {
        "rotate" => match super::right_angle(args) {
            0 => None,
            degrees => pair("-rotate", degrees.to_string()),
        },
        "flip" => pair("-flip", "vertical".to_string()),
        "flop" => pair("-flip", "horizontal".to_string()),
        "extract" => {
            let (left, top, width, height) = super::extract_box(args)?;
            pair("-crop", format!("{width}x{height}+{left}+{top}"))
        }
        _ => None,
    }
}

/// Argument lists, one per jpegtran invocation.
fn build_invocations(run: &EngineRun) -> Vec<Vec<String>> {
    let copy = run
        .option("copy")
        .and_then(Arg::as_str)
        .filter(|mode| COPY_MODES.contains(mode))
        .unwrap_or("all");

    let mut transforms: Vec<Vec<String>> = Vec::new();
    let mut switches = Vec::new();
    for op in &run.operations {
        match op.name.as_str() {
            "grayscale" => switches.push("-grayscale".to_string()),
            "progressive" => switches.push("-progressive".to_string()),
            "optimize" => switches.push("-optimize".to_string()),
            name => transforms.extend(transform_args(name, &op.args)),
        }
    }
    if transforms.is_empty() {
        transforms.push(Vec::new());
    }

    let last = transforms.len() - 1;
    transforms
        .into_iter()
        .enumerate()
        .map(|(i, transform)| {
            let mut args = vec!["-copy".to_string(), copy.to_string()];
            args.extend(transform);
            if i == last {
                args.extend(switches.iter().cloned());
            }
            args
        })
        .collect()
}

impl Engine for JpegtranEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        match name {
            "rotate" => Some(super::validate_right_angle(args)),
            "extract" => Some(super::validate_extract(args)),
            _ => None,
        }
    }

    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>> {
        let invocations = build_invocations(run);
        for args in &invocations {
            pipeline.add_stage(super::engine_process(self.name(), &self.program, args));
        }
        Ok(Some(invocations.concat()))
    }
}

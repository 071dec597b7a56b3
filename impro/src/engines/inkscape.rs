//! Inkscape, rendering vector input through `--pipe`.

use crate::operation::Arg;
use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};
use crate::Result;

const DEFAULT_OUTPUT: &str = "png";

pub struct InkscapeEngine {
    descriptor: EngineDescriptor,
    program: String,
}

impl InkscapeEngine {
    pub fn new(program: &str) -> Self {
        Self {
            descriptor: EngineDescriptor::new("inkscape")
                .operations(["resize", "density"])
                .input_types(["svg", "pdf", "eps"])
                .output_types(["png", "pdf", "eps"])
                .default_output_type(DEFAULT_OUTPUT)
                .unavailable(!super::binary_available("inkscape", program)),
            program: program.to_string(),
        }
    }
}

fn build_args(run: &EngineRun) -> Vec<String> {
    let output = run.output_type.as_deref().unwrap_or(DEFAULT_OUTPUT);
    let mut args = vec!["--pipe".to_string(), format!("--export-type={output}")];

    let density = run
        .last_args("density")
        .and_then(|args| args.first())
        .or_else(|| run.option("density"))
        .and_then(Arg::as_f64);
    if let Some(dpi) = density {
        args.push(format!("--export-dpi={dpi}"));
    }
    if let Some(target) = super::ResizeTarget::from_run(run) {
        if let Some(width) = target.width {
            args.push(format!("--export-width={width}"));
        }
        if let Some(height) = target.height {
            args.push(format!("--export-height={height}"));
        }
    }
    args.push("--export-filename=-".to_string());
    args
}

impl Engine for InkscapeEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        match name {
            "resize" => Some(super::validate_dimensions(args)),
            "density" => Some(matches!(args, [d] if d.as_f64().is_some_and(|d| d > 0.0))),
            _ => None,
        }
    }

    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>> {
        let args = build_args(run);
        pipeline.add_stage(
            super::engine_process(self.name(), &self.program, &args)
                .with_error_filter(super::is_error_line),
        );
        Ok(Some(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::test_run;
    use crate::operation::Operation;

    #[test]
    fn test_render_to_default_output() {
        let run = test_run(
            "inkscape",
            vec![
                Operation::new("density", vec![144.into()]),
                Operation::new("resize", vec![300.into()]),
            ],
            Some("svg"),
            None,
        );
        assert_eq!(
            build_args(&run),
            vec![
                "--pipe",
                "--export-type=png",
                "--export-dpi=144",
                "--export-width=300",
                "--export-filename=-"
            ]
        );
    }

    #[test]
    fn test_explicit_output_type() {
        let run = test_run("inkscape", vec![Operation::named("pdf")], Some("svg"), Some("pdf"));
        assert_eq!(
            build_args(&run),
            vec!["--pipe", "--export-type=pdf", "--export-filename=-"]
        );
    }

    #[test]
    fn test_descriptor() {
        let engine = InkscapeEngine::new("/nonexistent/inkscape");
        let descriptor = engine.descriptor();
        assert!(descriptor.unavailable);
        assert!(descriptor.compatible_with(Some("svg")));
        // A default output type makes the engine a converter for known types.
        assert!(descriptor.compatible_with(Some("jpeg")));
        assert!(!descriptor.compatible_with(None));
    }
}

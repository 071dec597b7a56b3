//! `gifsicle`, for GIF sources. Keeps animations intact.

use super::ResizeTarget;
use crate::operation::Arg;
use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};
use crate::Result;

const OPERATIONS: &[&str] = &[
    "resize",
    "extract",
    "rotate",
    "flip",
    "flop",
    "grayscale",
    "optimize",
    "ignoreAspectRatio",
];

const DEFAULT_OPTIMIZE_LEVEL: i64 = 2;

pub struct GifsicleEngine {
    descriptor: EngineDescriptor,
    program: String,
}

impl GifsicleEngine {
    pub fn new(program: &str) -> Self {
        Self {
            descriptor: EngineDescriptor::new("gifsicle")
                .operations(OPERATIONS.iter().copied())
                .input_types(["gif"])
                .output_types(["gif"])
                .unavailable(!super::binary_available("gifsicle", program)),
            program: program.to_string(),
        }
    }
}

fn resize_args(target: ResizeTarget) -> Vec<String> {
    match (target.width, target.height) {
        (Some(w), Some(h)) if target.ignore_aspect_ratio => {
            vec!["--resize".to_string(), format!("{w}x{h}")]
        }
        (Some(w), Some(h)) => vec!["--resize-fit".to_string(), format!("{w}x{h}")],
        (Some(w), None) => vec!["--resize-width".to_string(), w.to_string()],
        (None, Some(h)) => vec!["--resize-height".to_string(), h.to_string()],
        (None, None) => Vec::new(),
    }
}

fn optimize_level(arg: Option<&Arg>) -> i64 {
    arg.and_then(Arg::as_i64)
        .unwrap_or(DEFAULT_OPTIMIZE_LEVEL)
        .clamp(1, 3)
}

fn build_args(run: &EngineRun) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(level) = run.option("optimize") {
        args.push(format!("-O{}", optimize_level(Some(level))));
    }

    let target = ResizeTarget::from_run(run);
    let mut resized = false;
    for op in &run.operations {
        match op.name.as_str() {
            "resize" if !resized => {
                if let Some(target) = target {
                    args.extend(resize_args(target));
                    resized = true;
                }
            }
            "extract" => {
                if let Some((left, top, width, height)) = super::extract_box(&op.args) {
                    args.push("--crop".to_string());
                    args.push(format!("{left},{top}+{width}x{height}"));
                }
            }
            "rotate" => match super::right_angle(&op.args) {
                90 => args.push("--rotate-90".to_string()),
                180 => args.push("--rotate-180".to_string()),
                270 => args.push("--rotate-270".to_string()),
                _ => {}
            },
            "flip" => args.push("--flip-vertical".to_string()),
            "flop" => args.push("--flip-horizontal".to_string()),
            "grayscale" => args.extend(["--use-colormap".to_string(), "gray".to_string()]),
            "optimize" => args.push(format!("-O{}", optimize_level(op.args.first()))),
            _ => {}
        }
    }
    args
}

impl Engine for GifsicleEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        match name {
            "resize" => Some(super::validate_dimensions(args)),
            "extract" => Some(super::validate_extract(args)),
            "rotate" => Some(super::validate_right_angle(args)),
            "optimize" => Some(match args {
                [] => true,
                [level] => level.as_i64().is_some_and(|l| (1..=3).contains(&l)),
                _ => false,
            }),
            _ => None,
        }
    }

    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>> {
        let args = build_args(run);
        pipeline.add_stage(super::engine_process(self.name(), &self.program, &args));
        Ok(Some(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::test_run;
    use crate::operation::Operation;
    use std::collections::BTreeMap;

    #[test]
    fn test_resize_variants() {
        let run = test_run(
            "gifsicle",
            vec![Operation::new("resize", vec![120.into(), 80.into()])],
            Some("gif"),
            Some("gif"),
        );
        assert_eq!(build_args(&run), vec!["--resize-fit", "120x80"]);

        let run = test_run(
            "gifsicle",
            vec![
                Operation::new("resize", vec![120.into(), 80.into()]),
                Operation::named("ignoreAspectRatio"),
            ],
            Some("gif"),
            Some("gif"),
        );
        assert_eq!(build_args(&run), vec!["--resize", "120x80"]);

        let run = test_run(
            "gifsicle",
            vec![Operation::new("resize", vec![0.into(), 50.into()])],
            Some("gif"),
            Some("gif"),
        );
        assert_eq!(build_args(&run), vec!["--resize-height", "50"]);
    }

    #[test]
    fn test_transforms_and_options() {
        let mut options = BTreeMap::new();
        options.insert("optimize".to_string(), Arg::Integer(9));
        let mut run = test_run(
            "gifsicle",
            vec![
                Operation::new("extract", vec![5.into(), 6.into(), 10.into(), 20.into()]),
                Operation::new("rotate", vec![(-90).into()]),
                Operation::named("flip"),
                Operation::named("flop"),
                Operation::named("grayscale"),
            ],
            Some("gif"),
            Some("gif"),
        );
        run.options = Some(Arg::Map(options));
        assert_eq!(
            build_args(&run),
            vec![
                "-O3",
                "--crop",
                "5,6+10x20",
                "--rotate-270",
                "--flip-vertical",
                "--flip-horizontal",
                "--use-colormap",
                "gray",
            ]
        );
    }

    #[test]
    fn test_validation() {
        let engine = GifsicleEngine::new("/nonexistent/gifsicle");
        assert!(engine.descriptor().unavailable);
        assert!(!engine.descriptor().compatible_with(Some("png")));
        assert!(engine.descriptor().compatible_with(Some("gif")));
        assert_eq!(engine.validate_operation("optimize", &[]), Some(true));
        assert_eq!(engine.validate_operation("optimize", &[4.into()]), Some(false));
        assert_eq!(engine.validate_operation("rotate", &[45.into()]), Some(false));
    }
}

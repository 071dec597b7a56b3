//! `pngquant`: lossy palette quantisation of PNG images.

use crate::operation::Arg;
use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};
use crate::Result;

const OPERATIONS: &[&str] = &[
    "quantize", "speed", "quality", "posterize", "floyd", "nofs", "strip",
];

pub struct PngquantEngine {
    descriptor: EngineDescriptor,
    program: String,
}

impl PngquantEngine {
    pub fn new(program: &str) -> Self {
        Self {
            descriptor: EngineDescriptor::new("pngquant")
                .operations(OPERATIONS.iter().copied())
                .input_types(["png"])
                .output_types(["png"])
                .unavailable(!super::binary_available("pngquant", program)),
            program: program.to_string(),
        }
    }
}

/// `min-max` or a single maximum.
fn quality_range(arg: &Arg) -> Option<String> {
    let in_range = |q: i64| (0..=100).contains(&q);
    if let Some(max) = arg.as_i64() {
        return in_range(max).then(|| format!("0-{max}"));
    }
    let (min, max) = arg.as_str()?.split_once('-')?;
    let (min, max) = (min.parse::<i64>().ok()?, max.parse::<i64>().ok()?);
    (in_range(min) && in_range(max) && min <= max).then(|| format!("{min}-{max}"))
}

fn build_args(run: &EngineRun) -> Vec<String> {
    let mut args = Vec::new();
    let mut colors = None;
    let mut speed = run.option("speed").and_then(Arg::as_i64);

    for op in &run.operations {
        let first = op.args.first();
        match op.name.as_str() {
            "quantize" => colors = first.and_then(Arg::as_i64).or(colors),
            "speed" => speed = first.and_then(Arg::as_i64).or(speed),
            "quality" => {
                if let Some(range) = first.and_then(quality_range) {
                    args.push("--quality".to_string());
                    args.push(range);
                }
            }
            "posterize" => {
                if let Some(bits) = first.and_then(Arg::as_i64) {
                    args.push("--posterize".to_string());
                    args.push(bits.to_string());
                }
            }
            "floyd" => match first.and_then(Arg::as_f64) {
                Some(level) => args.push(format!("--floyd={level}")),
                None => args.push("--floyd".to_string()),
            },
            "nofs" => args.push("--nofs".to_string()),
            "strip" => args.push("--strip".to_string()),
            _ => {}
        }
    }

    if let Some(speed) = speed {
        args.push("--speed".to_string());
        args.push(speed.clamp(1, 11).to_string());
    }
    if let Some(colors) = colors {
        args.push(colors.clamp(2, 256).to_string());
    }
    args.push("-".to_string());
    args
}

impl Engine for PngquantEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        let one_int = |range: std::ops::RangeInclusive<i64>| {
            matches!(args, [n] if n.as_i64().is_some_and(|n| range.contains(&n)))
        };
        match name {
            "quantize" => Some(args.is_empty() || one_int(2..=256)),
            "speed" => Some(one_int(1..=11)),
            "posterize" => Some(one_int(0..=4)),
            "quality" => Some(matches!(args, [q] if quality_range(q).is_some())),
            "floyd" => Some(match args {
                [] => true,
                [level] => level.as_f64().is_some_and(|l| (0.0..=1.0).contains(&l)),
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
    use rstest::rstest;

    #[test]
    fn test_build_args() {
        let run = test_run(
            "pngquant",
            vec![
                Operation::new("quantize", vec![64.into()]),
                Operation::new("quality", vec!["60-80".into()]),
                Operation::new("speed", vec![3.into()]),
                Operation::named("nofs"),
            ],
            Some("png"),
            Some("png"),
        );
        assert_eq!(
            build_args(&run),
            vec!["--quality", "60-80", "--nofs", "--speed", "3", "64", "-"]
        );
    }

    #[test]
    fn test_defaults_read_stdin() {
        let run = test_run(
            "pngquant",
            vec![Operation::named("quantize")],
            Some("png"),
            Some("png"),
        );
        assert_eq!(build_args(&run), vec!["-"]);
    }

    #[rstest]
    #[case(Arg::Integer(80), Some("0-80"))]
    #[case(Arg::from("40-90"), Some("40-90"))]
    #[case(Arg::from("90-40"), None)]
    #[case(Arg::from("high"), None)]
    #[case(Arg::Integer(101), None)]
    fn test_quality_range(#[case] arg: Arg, #[case] expected: Option<&str>) {
        assert_eq!(quality_range(&arg).as_deref(), expected);
    }

    #[test]
    fn test_validation() {
        let engine = PngquantEngine::new("/nonexistent/pngquant");
        assert_eq!(engine.validate_operation("quantize", &[]), Some(true));
        assert_eq!(engine.validate_operation("quantize", &[1.into()]), Some(false));
        assert_eq!(engine.validate_operation("speed", &[11.into()]), Some(true));
        assert_eq!(engine.validate_operation("floyd", &[Arg::Float(0.5)]), Some(true));
        assert_eq!(engine.validate_operation("nofs", &[]), None);
    }
}

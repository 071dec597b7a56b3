//! GraphicsMagick `convert`, reading from stdin and writing to stdout.

use tracing::debug;

use super::{Gravity, ResizeTarget};
use crate::operation::Arg;
use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};
use crate::Result;

const OPERATIONS: &[&str] = &[
    "resize",
    "crop",
    "extract",
    "rotate",
    "flip",
    "flop",
    "grayscale",
    "blur",
    "sharpen",
    "quality",
    "progressive",
    "strip",
    "density",
    "withoutEnlargement",
    "ignoreAspectRatio",
];

const OUTPUT_TYPES: &[&str] = &["jpeg", "png", "gif", "tiff", "bmp", "webp"];

pub struct GmEngine {
    descriptor: EngineDescriptor,
    program: String,
}

impl GmEngine {
    pub fn new(program: &str) -> Self {
        Self {
            descriptor: EngineDescriptor::new("gm")
                .operations(OPERATIONS.iter().copied())
                .input_types([media_types::ANY_TYPE])
                .output_types(OUTPUT_TYPES.iter().copied())
                .unavailable(!super::binary_available("gm", program)),
            program: program.to_string(),
        }
    }
}

/// `TYPE:-` when the type is known, plain `-` otherwise.
fn stream_spec(type_name: Option<&str>) -> String {
    match type_name {
        Some(t) => format!("{}:-", t.to_ascii_uppercase()),
        None => "-".to_string(),
    }
}

fn number(arg: Option<&Arg>, default: &str) -> String {
    arg.filter(|a| a.is_number())
        .map(Arg::to_string)
        .unwrap_or_else(|| default.to_string())
}

fn build_args(run: &EngineRun) -> Vec<String> {
    let mut args = vec!["convert".to_string()];

    // Density is a read setting, so it has to precede the input.
    let density = run
        .last_args("density")
        .and_then(|args| args.first())
        .or_else(|| run.option("density"))
        .filter(|d| d.is_number());
    if let Some(density) = density {
        args.push("-density".to_string());
        args.push(density.to_string());
    }
    args.push(stream_spec(run.input_type.as_deref()));

    if run.option("strip").and_then(Arg::as_bool).unwrap_or(false) {
        args.extend(["+profile".to_string(), "*".to_string()]);
    }

    let target = ResizeTarget::from_run(run);
    let fill_box = target
        .filter(|_| run.has("crop"))
        .and_then(|t| Some((t.width?, t.height?)));
    let mut quality = run.option("quality").and_then(Arg::as_i64);
    let mut resized = false;

    for op in &run.operations {
        let first = op.args.first();
        match op.name.as_str() {
            "resize" if fill_box.is_none() && !resized => {
                if let Some(target) = target {
                    let modifier = if target.ignore_aspect_ratio {
                        "!"
                    } else if target.without_enlargement {
                        ">"
                    } else {
                        ""
                    };
                    args.push("-resize".to_string());
                    args.push(format!("{}{modifier}", target.geometry()));
                    resized = true;
                }
            }
            "crop" => match fill_box {
                Some((width, height)) if !resized => {
                    let gravity = first
                        .and_then(Arg::as_str)
                        .and_then(|g| g.parse::<Gravity>().ok())
                        .unwrap_or_default();
                    args.extend([
                        "-resize".to_string(),
                        format!("{width}x{height}^"),
                        "-gravity".to_string(),
                        gravity.gm_name().to_string(),
                        "-extent".to_string(),
                        format!("{width}x{height}"),
                    ]);
                    resized = true;
                }
                Some(_) => {}
                None => debug!("crop without a resize box, ignored"),
            },
            "extract" => {
                if let Some((left, top, width, height)) = super::extract_box(&op.args) {
                    args.extend([
                        "-crop".to_string(),
                        format!("{width}x{height}+{left}+{top}"),
                        "+repage".to_string(),
                    ]);
                }
            }
            "rotate" => {
                args.push("-rotate".to_string());
                args.push(number(first, "90"));
            }
            "flip" => args.push("-flip".to_string()),
            "flop" => args.push("-flop".to_string()),
            "grayscale" => args.extend(["-type".to_string(), "Grayscale".to_string()]),
            "blur" => {
                args.push("-blur".to_string());
                args.push(format!("0x{}", number(first, "1")));
            }
            "sharpen" => {
                args.push("-sharpen".to_string());
                args.push(format!("0x{}", number(first, "1")));
            }
            "quality" => quality = first.and_then(Arg::as_i64).or(quality),
            "progressive" => args.extend(["-interlace".to_string(), "Line".to_string()]),
            "strip" => args.extend(["+profile".to_string(), "*".to_string()]),
            _ => {}
        }
    }

    if let Some(quality) = quality {
        args.push("-quality".to_string());
        args.push(quality.clamp(1, 100).to_string());
    }
    args.push(stream_spec(
        run.output_type.as_deref().or(run.input_type.as_deref()),
    ));
    args
}

fn validate_angle(args: &[Arg]) -> bool {
    match args {
        [] => true,
        [angle] => angle.is_number(),
        _ => false,
    }
}

impl Engine for GmEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        match name {
            "resize" => Some(super::validate_dimensions(args)),
            "crop" => Some(super::validate_gravity(args)),
            "extract" => Some(super::validate_extract(args)),
            "rotate" => Some(validate_angle(args)),
            "blur" | "sharpen" => Some(super::validate_optional_number(args)),
            "quality" => Some(super::validate_quality(args)),
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
    use std::collections::BTreeMap;

    #[test]
    fn test_resize_and_crop_become_fill_and_extent() {
        let run = test_run(
            "gm",
            vec![
                Operation::new("resize", vec![120.into(), 80.into()]),
                Operation::new("crop", vec!["north".into()]),
            ],
            Some("jpeg"),
            Some("png"),
        );
        assert_eq!(
            build_args(&run),
            vec![
                "convert", "JPEG:-", "-resize", "120x80^", "-gravity", "North", "-extent",
                "120x80", "PNG:-"
            ]
        );
    }

    #[test]
    fn test_resize_modifiers() {
        let run = test_run(
            "gm",
            vec![
                Operation::new("resize", vec![120.into()]),
                Operation::named("withoutEnlargement"),
            ],
            None,
            None,
        );
        assert_eq!(build_args(&run), vec!["convert", "-", "-resize", "120x>", "-"]);

        let run = test_run(
            "gm",
            vec![
                Operation::new("resize", vec![10.into(), 20.into()]),
                Operation::named("ignoreAspectRatio"),
            ],
            Some("png"),
            None,
        );
        assert_eq!(
            build_args(&run),
            vec!["convert", "PNG:-", "-resize", "10x20!", "PNG:-"]
        );
    }

    #[test]
    fn test_options_and_read_settings() {
        let mut options = BTreeMap::new();
        options.insert("quality".to_string(), Arg::Integer(70));
        options.insert("strip".to_string(), Arg::Bool(true));
        options.insert("density".to_string(), Arg::Integer(150));

        let mut run = test_run(
            "gm",
            vec![
                Operation::named("progressive"),
                Operation::new("blur", vec![Arg::Float(1.5)]),
                Operation::named("jpeg"),
            ],
            Some("pdf"),
            Some("jpeg"),
        );
        run.options = Some(Arg::Map(options));

        assert_eq!(
            build_args(&run),
            vec![
                "convert", "-density", "150", "PDF:-", "+profile", "*", "-interlace", "Line",
                "-blur", "0x1.5", "-quality", "70", "JPEG:-"
            ]
        );
    }

    #[test]
    fn test_quality_operation_overrides_option() {
        let mut options = BTreeMap::new();
        options.insert("quality".to_string(), Arg::Integer(70));
        let mut run = test_run(
            "gm",
            vec![
                Operation::new("extract", vec![1.into(), 2.into(), 30.into(), 40.into()]),
                Operation::new("rotate", vec![(-45).into()]),
                Operation::new("quality", vec![90.into()]),
            ],
            Some("jpeg"),
            Some("jpeg"),
        );
        run.options = Some(Arg::Map(options));
        assert_eq!(
            build_args(&run),
            vec![
                "convert", "JPEG:-", "-crop", "30x40+1+2", "+repage", "-rotate", "-45",
                "-quality", "90", "JPEG:-"
            ]
        );
    }

    #[test]
    fn test_validation() {
        let engine = GmEngine::new("/nonexistent/gm");
        assert!(engine.descriptor().unavailable);
        assert_eq!(engine.validate_operation("rotate", &[45.into()]), Some(true));
        assert_eq!(engine.validate_operation("density", &[0.into()]), Some(false));
        assert_eq!(engine.validate_operation("flip", &[]), None);

    }
}

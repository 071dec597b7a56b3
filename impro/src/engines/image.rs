//! In-process engine backed by the `image` crate.

use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use media_types::Dimensions;
use pipeline_common::{BlockingTransformStage, PipelineError};
use tracing::debug;

use super::{Gravity, ResizeTarget};
use crate::operation::Arg;
use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};
use crate::{Error, Result};

const OPERATIONS: &[&str] = &[
    "resize",
    "crop",
    "extract",
    "rotate",
    "flip",
    "flop",
    "grayscale",
    "blur",
    "quality",
    "withoutEnlargement",
    "ignoreAspectRatio",
];

const INPUT_TYPES: &[&str] = &["jpeg", "png", "gif", "tiff", "bmp", "webp"];
const OUTPUT_TYPES: &[&str] = &["jpeg", "png", "gif", "tiff", "bmp"];

const DEFAULT_JPEG_QUALITY: u8 = 80;

pub struct ImageEngine {
    descriptor: EngineDescriptor,
    max_input_pixels: Option<u64>,
    max_output_pixels: Option<u64>,
}

impl ImageEngine {
    pub fn new(max_input_pixels: Option<u64>, max_output_pixels: Option<u64>) -> Self {
        Self {
            descriptor: EngineDescriptor::new("image")
                .operations(OPERATIONS.iter().copied())
                .input_types(INPUT_TYPES.iter().copied())
                .output_types(OUTPUT_TYPES.iter().copied()),
            max_input_pixels,
            max_output_pixels,
        }
    }
}

/// One pixel-level step, in queue order.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Resize(ResizeTarget),
    /// Fill the last resize box, then cut it out around `Gravity`.
    Cover {
        width: u32,
        height: u32,
        gravity: Gravity,
    },
    Extract {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    },
    Rotate(u32),
    Flip,
    Flop,
    Grayscale,
    Blur(f32),
}

/// Everything the blocking transform needs, detached from the pipeline.
#[derive(Debug, Clone, PartialEq)]
struct Plan {
    steps: Vec<Step>,
    output: Option<ImageFormat>,
    quality: u8,
    max_input_pixels: Option<u64>,
    max_output_pixels: Option<u64>,
}

impl ImageEngine {
    fn plan(&self, run: &EngineRun, max_output_pixels: Option<u64>) -> Plan {
        let mut steps: Vec<Step> = Vec::new();
        let mut quality = run
            .option("quality")
            .and_then(Arg::as_i64)
            .map(|q| q.clamp(1, 100) as u8)
            .unwrap_or(DEFAULT_JPEG_QUALITY);

        for op in &run.operations {
            let args = op.args.as_slice();
            match op.name.as_str() {
                "resize" => steps.push(Step::Resize(ResizeTarget::from_args(args, run))),
                "crop" => {
                    let gravity = args
                        .first()
                        .and_then(Arg::as_str)
                        .and_then(|g| Gravity::from_str(g).ok())
                        .unwrap_or_default();
                    let previous = steps
                        .iter()
                        .rposition(|s| matches!(s, Step::Resize(_)));
                    let target = match previous {
                        Some(index) => match steps[index] {
                            Step::Resize(target) => Some(target),
                            _ => None,
                        },
                        None => ResizeTarget::from_run(run),
                    };
                    if let Some(ResizeTarget {
                        width: Some(width),
                        height: Some(height),
                        ..
                    }) = target
                    {
                        let cover = Step::Cover {
                            width,
                            height,
                            gravity,
                        };
                        // Cover-and-crop replaces a resize it directly follows.
                        match previous {
                            Some(index) if index + 1 == steps.len() => steps[index] = cover,
                            _ => steps.push(cover),
                        }
                    }
                }
                "extract" => {
                    if let Some((left, top, width, height)) = super::extract_box(args) {
                        steps.push(Step::Extract {
                            left,
                            top,
                            width,
                            height,
                        });
                    }
                }
                "rotate" => steps.push(Step::Rotate(super::right_angle(args))),
                "flip" => steps.push(Step::Flip),
                "flop" => steps.push(Step::Flop),
                "grayscale" => steps.push(Step::Grayscale),
                "blur" => {
                    let sigma = args.first().and_then(Arg::as_f64).unwrap_or(1.0) as f32;
                    steps.push(Step::Blur(sigma.max(0.3)));
                }
                "quality" => {
                    if let Some(q) = args.first().and_then(Arg::as_i64) {
                        quality = q.clamp(1, 100) as u8;
                    }
                }
                _ => {}
            }
        }

        Plan {
            steps,
            output: run.output_type.as_deref().and_then(format_for),
            quality,
            max_input_pixels: self.max_input_pixels,
            max_output_pixels,
        }
    }
}

fn format_for(type_name: &str) -> Option<ImageFormat> {
    match type_name {
        "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "gif" => Some(ImageFormat::Gif),
        "tiff" => Some(ImageFormat::Tiff),
        "bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

fn image_error(err: image::ImageError) -> PipelineError {
    PipelineError::strategy(err)
}

impl Plan {
    fn apply(&self, input: Bytes) -> std::result::Result<Bytes, PipelineError> {
        let reader = ImageReader::new(Cursor::new(input.as_ref()))
            .with_guessed_format()
            .map_err(PipelineError::Io)?;
        let input_format = reader.format();
        let decoder = reader.into_decoder().map_err(image_error)?;

        let (width, height) = decoder.dimensions();
        let source = Dimensions::new(width, height);
        if !source.fits(self.max_input_pixels) {
            return Err(PipelineError::strategy(Error::DimensionLimit {
                width,
                height,
                max_pixels: self.max_input_pixels.unwrap_or_default(),
            }));
        }

        let mut img = DynamicImage::from_decoder(decoder).map_err(image_error)?;
        for step in &self.steps {
            img = apply_step(img, step);
        }

        let size = Dimensions::new(img.width(), img.height());
        if !size.fits(self.max_output_pixels) {
            return Err(PipelineError::strategy(Error::DimensionLimit {
                width: size.width,
                height: size.height,
                max_pixels: self.max_output_pixels.unwrap_or_default(),
            }));
        }

        let format = self.output.or(input_format).unwrap_or(ImageFormat::Png);
        debug!(from = %source, to = %size, ?format, "Encoding image");

        let mut out = Cursor::new(Vec::new());
        if format == ImageFormat::Jpeg {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.quality))
                .map_err(image_error)?;
        } else {
            img.write_to(&mut out, format).map_err(image_error)?;
        }
        Ok(Bytes::from(out.into_inner()))
    }
}

fn apply_step(img: DynamicImage, step: &Step) -> DynamicImage {
    match *step {
        Step::Resize(target) => resize(img, target),
        Step::Cover {
            width,
            height,
            gravity,
        } => cover(img, width, height, gravity),
        Step::Extract {
            left,
            top,
            width,
            height,
        } => {
            let width = width.min(img.width().saturating_sub(left));
            let height = height.min(img.height().saturating_sub(top));
            img.crop_imm(left, top, width, height)
        }
        Step::Rotate(90) => img.rotate90(),
        Step::Rotate(180) => img.rotate180(),
        Step::Rotate(270) => img.rotate270(),
        Step::Rotate(_) => img,
        Step::Flip => img.flipv(),
        Step::Flop => img.fliph(),
        Step::Grayscale => img.grayscale(),
        Step::Blur(sigma) => img.blur(sigma),
    }
}

fn resize(img: DynamicImage, target: ResizeTarget) -> DynamicImage {
    let (iw, ih) = (img.width().max(1), img.height().max(1));
    let (w, h) = match (target.width, target.height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(ih, w, iw)),
        (None, Some(h)) => (scale(iw, h, ih), h),
        (None, None) => return img,
    };
    if target.without_enlargement && w >= iw && h >= ih {
        return img;
    }
    if target.ignore_aspect_ratio {
        img.resize_exact(w.max(1), h.max(1), FilterType::Lanczos3)
    } else {
        img.resize(w.max(1), h.max(1), FilterType::Lanczos3)
    }
}

fn cover(img: DynamicImage, width: u32, height: u32, gravity: Gravity) -> DynamicImage {
    let (iw, ih) = (img.width().max(1), img.height().max(1));
    let ratio = f64::max(
        f64::from(width) / f64::from(iw),
        f64::from(height) / f64::from(ih),
    );
    let sw = ((f64::from(iw) * ratio).ceil() as u32).max(width);
    let sh = ((f64::from(ih) * ratio).ceil() as u32).max(height);
    let scaled = img.resize_exact(sw, sh, FilterType::Lanczos3);
    let (x, y) = gravity.offset(sw, sh, width, height);
    scaled.crop_imm(x, y, width, height)
}

/// `value * numerator / denominator`, rounded and at least 1.
fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = u64::from(value) * u64::from(numerator) / u64::from(denominator.max(1));
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

impl Engine for ImageEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        match name {
            "resize" => Some(super::validate_dimensions(args)),
            "crop" => Some(super::validate_gravity(args)),
            "extract" => Some(super::validate_extract(args)),
            "rotate" => Some(super::validate_right_angle(args)),
            "blur" => Some(super::validate_optional_number(args)),
            "quality" => Some(super::validate_quality(args)),
            _ => None,
        }
    }

    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>> {
        let max_output_pixels = pipeline.options().max_output_pixels.or(self.max_output_pixels);
        let mut plan = self.plan(run, max_output_pixels);
        plan.max_input_pixels = pipeline.options().max_input_pixels.or(plan.max_input_pixels);
        debug!(steps = plan.steps.len(), output = ?plan.output, "Planned image run");

        pipeline.add_stage(BlockingTransformStage::new("image", move |input| plan.apply(input)));
        Ok(None)
    }
}

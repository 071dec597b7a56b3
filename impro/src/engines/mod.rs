//! Built-in engines.
//!
//! - `metadata`: describes the input as a JSON object.
//! - `image`: in-process decoding and transforms with the `image` crate.
//! - `gifsicle`, `gm`, `inkscape`, `jpegtran`, `pngquant`: external tools
//!   driven through stdin/stdout.
//!
//! Operation names are shared between engines so a run can move to whichever
//! engine handles the current media type; argument shapes are checked by the
//! validators below.

mod gifsicle;
mod gm;
mod image;
mod inkscape;
mod jpegtran;
mod metadata;
mod pngquant;

use std::str::FromStr;

use pipeline_common::ProcessStage;
use strum::{Display, EnumString};
use tracing::warn;

use crate::config::ImproConfig;
use crate::operation::Arg;
use crate::registry::{EngineRegistryBuilder, EngineRun};
use crate::{Error, Result};

pub use self::gifsicle::GifsicleEngine;
pub use self::gm::GmEngine;
pub use self::image::ImageEngine;
pub use self::inkscape::InkscapeEngine;
pub use self::jpegtran::JpegtranEngine;
pub use self::metadata::MetadataEngine;
pub use self::pngquant::PngquantEngine;

/// Register the engines named in `config.engines`, in that order.
pub(crate) fn register_defaults(
    mut builder: EngineRegistryBuilder,
    config: &ImproConfig,
) -> Result<EngineRegistryBuilder> {
    for name in &config.engines {
        builder = match name.as_str() {
            "metadata" => builder.register(MetadataEngine::new()),
            "image" => builder.register(ImageEngine::new(
                config.max_input_pixels,
                config.max_output_pixels,
            )),
            "gifsicle" => builder.register(GifsicleEngine::new(&config.gifsicle_path)),
            "gm" => builder.register(GmEngine::new(&config.gm_path)),
            "inkscape" => builder.register(InkscapeEngine::new(&config.inkscape_path)),
            "jpegtran" => builder.register(JpegtranEngine::new(&config.jpegtran_path)),
            "pngquant" => builder.register(PngquantEngine::new(&config.pngquant_path)),
            other => return Err(Error::config(format!("unknown engine {other}"))),
        };
    }
    Ok(builder)
}

/// Whether an engine binary can be found on this host.
fn binary_available(engine: &str, program: &str) -> bool {
    let found = process_utils::find_executable(program).is_some();
    if !found {
        warn!(engine, program, "Engine binary not found; engine disabled");
    }
    found
}

/// A process stage for an engine, named after the engine.
fn engine_process(engine: &str, program: &str, args: &[String]) -> ProcessStage {
    ProcessStage::new(program)
        .with_name(engine)
        .args(args.iter().cloned())
}

/// Stderr filter for tools that log warnings during ordinary runs.
fn is_error_line(line: &str) -> bool {
    !line.trim().is_empty() && !line.to_ascii_lowercase().contains("warning")
}

/// Anchor used when cropping to a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Gravity {
    #[default]
    #[strum(serialize = "center", serialize = "centre")]
    Center,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Gravity {
    /// Offset of a `width`x`height` box anchored inside `outer_width`x`outer_height`.
    pub fn offset(self, outer_width: u32, outer_height: u32, width: u32, height: u32) -> (u32, u32) {
        let free_x = outer_width.saturating_sub(width);
        let free_y = outer_height.saturating_sub(height);
        let x = match self {
            Self::West | Self::NorthWest | Self::SouthWest => 0,
            Self::East | Self::NorthEast | Self::SouthEast => free_x,
            _ => free_x / 2,
        };
        let y = match self {
            Self::North | Self::NorthWest | Self::NorthEast => 0,
            Self::South | Self::SouthWest | Self::SouthEast => free_y,
            _ => free_y / 2,
        };
        (x, y)
    }

    /// GraphicsMagick spelling, e.g. `NorthEast`.
    pub fn gm_name(self) -> &'static str {
        match self {
            Self::Center => "Center",
            Self::North => "North",
            Self::NorthEast => "NorthEast",
            Self::East => "East",
            Self::SouthEast => "SouthEast",
            Self::South => "South",
            Self::SouthWest => "SouthWest",
            Self::West => "West",
            Self::NorthWest => "NorthWest",
        }
    }
}

/// Target box of a `resize`, with the modifiers that apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeTarget {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ignore_aspect_ratio: bool,
    pub without_enlargement: bool,
}

impl ResizeTarget {
    /// The last `resize` of a run, if any.
    pub fn from_run(run: &EngineRun) -> Option<Self> {
        run.last_args("resize").map(|args| Self::from_args(args, run))
    }

    /// The box of one `resize`, with the modifiers queued in its run.
    pub fn from_args(args: &[Arg], run: &EngineRun) -> Self {
        Self {
            width: args.first().and_then(Arg::as_u32).filter(|w| *w > 0),
            height: args.get(1).and_then(Arg::as_u32).filter(|h| *h > 0),
            ignore_aspect_ratio: run.has("ignoreAspectRatio"),
            without_enlargement: run.has("withoutEnlargement"),
        }
    }

    /// `WxH` geometry, leaving out a missing side.
    pub fn geometry(&self) -> String {
        let side = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_default();
        format!("{}x{}", side(self.width), side(self.height))
    }
}

pub(crate) fn validate_dimensions(args: &[Arg]) -> bool {
    (1..=2).contains(&args.len()) && args.iter().all(|a| a.as_u32().is_some())
}

pub(crate) fn validate_gravity(args: &[Arg]) -> bool {
    match args {
        [] => true,
        [gravity] => gravity.as_str().is_some_and(|g| Gravity::from_str(g).is_ok()),
        _ => false,
    }
}

pub(crate) fn validate_extract(args: &[Arg]) -> bool {
    args.len() == 4 && args.iter().all(|a| a.as_u32().is_some())
}

pub(crate) fn validate_right_angle(args: &[Arg]) -> bool {
    match args {
        [] => true,
        [angle] => angle.as_i64().is_some_and(|a| a % 90 == 0),
        _ => false,
    }
}

pub(crate) fn validate_quality(args: &[Arg]) -> bool {
    matches!(args, [q] if q.as_i64().is_some_and(|q| (1..=100).contains(&q)))
}

pub(crate) fn validate_optional_number(args: &[Arg]) -> bool {
    match args {
        [] => true,
        [n] => n.as_f64().is_some_and(|n| n >= 0.0),
        _ => false,
    }
}

/// Rotation of a run, normalised to 0, 90, 180 or 270 degrees.
pub(crate) fn right_angle(args: &[Arg]) -> u32 {
    let degrees = args.first().and_then(Arg::as_i64).unwrap_or(90);
    degrees.rem_euclid(360) as u32
}

/// `extract` arguments as `(left, top, width, height)`.
pub(crate) fn extract_box(args: &[Arg]) -> Option<(u32, u32, u32, u32)> {
    match args {
        [left, top, width, height] => Some((
            left.as_u32()?,
            top.as_u32()?,
            width.as_u32()?,
            height.as_u32()?,
        )),
        _ => None,
    }
}

/// A run as the assigner would hand it to `engine`.
#[cfg(test)]
pub(crate) fn test_run(
    engine: &str,
    operations: Vec<crate::operation::Operation>,
    input_type: Option<&str>,
    output_type: Option<&str>,
) -> EngineRun {
    EngineRun {
        engine: engine.to_string(),
        range: 0..operations.len(),
        operations,
        options: None,
        input_type: input_type.map(str::to_string),
        output_type: output_type.map(str::to_string),
    }
}

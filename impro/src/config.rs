//! Engine and pipeline configuration.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Engines registered by default, in priority order.
pub const DEFAULT_ENGINES: &[&str] = &[
    "metadata", "gifsicle", "image", "gm", "inkscape", "jpegtran", "pngquant",
];

/// Process-wide engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImproConfig {
    pub gm_path: String,
    pub gifsicle_path: String,
    pub jpegtran_path: String,
    pub pngquant_path: String,
    pub inkscape_path: String,
    /// Largest decoded input image, in pixels, library engines accept.
    pub max_input_pixels: Option<u64>,
    /// Largest output image, in pixels, a resize may produce.
    pub max_output_pixels: Option<u64>,
    pub channel_size: usize,
    /// Engines to register, in priority order.
    pub engines: Vec<String>,
}

impl Default for ImproConfig {
    fn default() -> Self {
        Self {
            gm_path: "gm".to_string(),
            gifsicle_path: "gifsicle".to_string(),
            jpegtran_path: "jpegtran".to_string(),
            pngquant_path: "pngquant".to_string(),
            inkscape_path: "inkscape".to_string(),
            max_input_pixels: None,
            max_output_pixels: None,
            channel_size: pipeline_common::DEFAULT_CHANNEL_CAPACITY,
            engines: DEFAULT_ENGINES.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl ImproConfig {
    /// Defaults overridden by `IMPRO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `IMPRO_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Apply `IMPRO_*` overrides on top of the current values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let paths = [
            ("IMPRO_GM_PATH", &mut self.gm_path),
            ("IMPRO_GIFSICLE_PATH", &mut self.gifsicle_path),
            ("IMPRO_JPEGTRAN_PATH", &mut self.jpegtran_path),
            ("IMPRO_PNGQUANT_PATH", &mut self.pngquant_path),
            ("IMPRO_INKSCAPE_PATH", &mut self.inkscape_path),
        ];
        for (key, slot) in paths {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }

        if let Some(value) = lookup("IMPRO_MAX_INPUT_PIXELS") {
            self.max_input_pixels = Some(parse_pixels("IMPRO_MAX_INPUT_PIXELS", &value)?);
        }
        if let Some(value) = lookup("IMPRO_MAX_OUTPUT_PIXELS") {
            self.max_output_pixels = Some(parse_pixels("IMPRO_MAX_OUTPUT_PIXELS", &value)?);
        }
        Ok(())
    }

    /// Per-request options seeded from this configuration.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            max_input_pixels: self.max_input_pixels,
            max_output_pixels: self.max_output_pixels,
            channel_size: self.channel_size,
            ..PipelineOptions::default()
        }
    }
}

fn parse_pixels(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} must be a pixel count, got {value:?}")))
}

/// Per-request pipeline options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Media type of the input, if known.
    pub source_type: Option<String>,
    /// Caller-supplied metadata merged into `metadata` output.
    pub source_metadata: Option<Map<String, Value>>,
    pub max_input_pixels: Option<u64>,
    pub max_output_pixels: Option<u64>,
    /// Engines this pipeline must not use.
    pub disabled: BTreeSet<String>,
    pub channel_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            source_type: None,
            source_metadata: None,
            max_input_pixels: None,
            max_output_pixels: None,
            disabled: BTreeSet::new(),
            channel_size: pipeline_common::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl PipelineOptions {
    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn with_source_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.source_metadata = Some(metadata);
        self
    }

    pub fn with_max_output_pixels(mut self, max: u64) -> Self {
        self.max_output_pixels = Some(max);
        self
    }

    pub fn disable(mut self, engine: impl Into<String>) -> Self {
        self.disabled.insert(engine.into());
        self
    }

    pub fn is_disabled(&self, engine: &str) -> bool {
        self.disabled.contains(engine)
    }
}

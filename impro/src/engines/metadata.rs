//! The `metadata` engine: describes the input image as one JSON object.

use std::io::{BufRead, Cursor, Seek};

use bytes::Bytes;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ColorType, ImageDecoder, ImageFormat, ImageReader};
use pipeline_common::{BlockingTransformStage, PipelineError};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::pipeline::Pipeline;
use crate::registry::{Engine, EngineDescriptor, EngineRun};
use crate::Result;

/// Length of the fixed ICC profile header.
const ICC_HEADER_LEN: usize = 128;

pub struct MetadataEngine {
    descriptor: EngineDescriptor,
}

impl MetadataEngine {
    pub fn new() -> Self {
        Self {
            descriptor: EngineDescriptor::new("metadata")
                .operations(["metadata"])
                .input_types([media_types::ANY_TYPE])
                .default_output_type("json"),
        }
    }
}

impl Default for MetadataEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields of an ICC profile header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IccHeader {
    pub size: u32,
    pub version: String,
    pub device_class: String,
    pub color_space: String,
    pub connection_space: String,
}

/// Parse an ICC profile header. `None` if the data is not a valid profile.
pub fn parse_icc_header(profile: &[u8]) -> Option<IccHeader> {
    let header = profile.get(..ICC_HEADER_LEN)?;
    if &header[36..40] != b"acsp" {
        return None;
    }
    let size = u32::from_be_bytes(header[0..4].try_into().ok()?);
    if (size as usize) < ICC_HEADER_LEN {
        return None;
    }
    let signature = |range: std::ops::Range<usize>| {
        String::from_utf8_lossy(&header[range]).trim().to_string()
    };
    Some(IccHeader {
        size,
        version: format!("{}.{}", header[8], header[9] >> 4),
        device_class: signature(12..16),
        color_space: signature(16..20),
        connection_space: signature(20..24),
    })
}

/// Image properties read from the encoded input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    format: Option<String>,
    width: u32,
    height: u32,
    space: &'static str,
    channels: u8,
    bits_per_pixel: u16,
    has_alpha: bool,
    is_animated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    icc: Option<IccHeader>,
}

fn color_space(color_type: ColorType) -> &'static str {
    match color_type {
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => "b-w",
        _ => "srgb",
    }
}

fn read_properties(input: &[u8]) -> std::result::Result<Properties, image::ImageError> {
    let reader = ImageReader::new(Cursor::new(input)).with_guessed_format()?;
    let format = reader.format();
    let mut decoder = reader.into_decoder()?;

    // A profile that cannot be read or parsed is left out.
    let icc = decoder
        .icc_profile()
        .ok()
        .flatten()
        .and_then(|profile| parse_icc_header(&profile));
    let (width, height) = decoder.dimensions();
    let color_type = decoder.color_type();

    Ok(Properties {
        format: format
            .and_then(|f| f.extensions_str().first().copied())
            .and_then(media_types::canonical_name)
            .map(str::to_string),
        width,
        height,
        space: color_space(color_type),
        channels: color_type.channel_count(),
        bits_per_pixel: color_type.bits_per_pixel(),
        has_alpha: color_type.has_alpha(),
        is_animated: format.is_some_and(|f| is_animated(f, input)),
        icc,
    })
}

fn is_animated(format: ImageFormat, input: &[u8]) -> bool {
    match format {
        ImageFormat::Gif => gif_frames(Cursor::new(input)) > 1,
        ImageFormat::Png => is_apng(input),
        ImageFormat::WebP => is_animated_webp(input),
        _ => false,
    }
}

fn gif_frames<R: BufRead + Seek>(reader: R) -> usize {
    GifDecoder::new(reader)
        .map(|decoder| decoder.into_frames().take(2).filter_map(|f| f.ok()).count())
        .unwrap_or(0)
}

/// An animated PNG carries an `acTL` chunk before its first `IDAT`.
fn is_apng(input: &[u8]) -> bool {
    let mut pos = 8;
    while let Some(header) = input.get(pos..pos + 8) {
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        match &header[4..8] {
            b"acTL" => return true,
            b"IDAT" | b"IEND" => return false,
            _ => pos = pos.saturating_add(12).saturating_add(len),
        }
    }
    false
}

/// Animated WebP files use the extended `VP8X` header with the animation flag.
fn is_animated_webp(input: &[u8]) -> bool {
    input.get(12..16) == Some(b"VP8X".as_slice())
        && input.get(20).is_some_and(|flags| flags & 0x02 != 0)
}

/// Build the metadata document for `input`.
fn describe(
    input: &[u8],
    known_type: Option<&str>,
    source_metadata: Option<&Map<String, Value>>,
) -> Value {
    let mut doc = Map::new();
    if let Some(type_name) = known_type {
        doc.insert("type".to_string(), json!(type_name));
        if let Some(content_type) = media_types::content_type_for(type_name) {
            doc.insert("contentType".to_string(), json!(content_type));
        }
    }
    if let Some(source) = source_metadata {
        doc.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    match read_properties(input) {
        Ok(properties) => {
            if !doc.contains_key("type")
                && let Some(format) = &properties.format
            {
                doc.insert("type".to_string(), json!(format));
                if let Some(content_type) = media_types::content_type_for(format) {
                    doc.insert("contentType".to_string(), json!(content_type));
                }
            }
            if let Ok(Value::Object(fields)) = serde_json::to_value(&properties) {
                doc.extend(fields.into_iter().filter(|(k, _)| k != "format"));
            }
        }
        Err(e) => {
            debug!(error = %e, "Could not read image properties");
            doc.insert("error".to_string(), json!(e.to_string()));
        }
    }
    doc.insert("size".to_string(), json!(input.len()));
    Value::Object(doc)
}

impl Engine for MetadataEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>> {
        let known_type = run.input_type.clone();
        // Caller metadata describes the source, so it only applies before any transform.
        let source_metadata = (run.range.start == 0)
            .then(|| pipeline.options().source_metadata.clone())
            .flatten();

        pipeline.add_stage(BlockingTransformStage::new("metadata", move |input: Bytes| {
            let doc = describe(&input, known_type.as_deref(), source_metadata.as_ref());
            serde_json::to_vec(&doc)
                .map(Bytes::from)
                .map_err(PipelineError::strategy)
        }));
        Ok(None)
    }
}

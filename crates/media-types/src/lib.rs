//! Shared image media-type table.
//!
//! Every type name understood by the pipeline (and usable as a type-selector
//! operation such as `png` or `jpeg`) is listed once in [`MEDIA_TYPES`].

use serde::Serialize;

/// Wildcard accepted in an engine's input type list.
pub const ANY_TYPE: &str = "*";

/// One entry of the media-type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaType {
    /// Canonical type name, also the name of the type-selector operation.
    pub name: &'static str,
    pub content_type: &'static str,
    pub extensions: &'static [&'static str],
}

pub const MEDIA_TYPES: &[MediaType] = &[
    MediaType {
        name: "jpeg",
        content_type: "image/jpeg",
        extensions: &["jpg", "jpeg", "jpe"],
    },
    MediaType {
        name: "png",
        content_type: "image/png",
        extensions: &["png"],
    },
    MediaType {
        name: "gif",
        content_type: "image/gif",
        extensions: &["gif"],
    },
    MediaType {
        name: "webp",
        content_type: "image/webp",
        extensions: &["webp"],
    },
    MediaType {
        name: "tiff",
        content_type: "image/tiff",
        extensions: &["tif", "tiff"],
    },
    MediaType {
        name: "bmp",
        content_type: "image/bmp",
        extensions: &["bmp"],
    },
    MediaType {
        name: "avif",
        content_type: "image/avif",
        extensions: &["avif"],
    },
    MediaType {
        name: "ico",
        content_type: "image/x-icon",
        extensions: &["ico"],
    },
    MediaType {
        name: "svg",
        content_type: "image/svg+xml",
        extensions: &["svg"],
    },
    MediaType {
        name: "pdf",
        content_type: "application/pdf",
        extensions: &["pdf"],
    },
    MediaType {
        name: "eps",
        content_type: "application/postscript",
        extensions: &["eps"],
    },
    MediaType {
        name: "json",
        content_type: "application/json",
        extensions: &["json"],
    },
];

/// Look up a type by canonical name or alias (`jpg` resolves to `jpeg`).
pub fn by_name(name: &str) -> Option<&'static MediaType> {
    let name = name.trim().to_ascii_lowercase();
    MEDIA_TYPES
        .iter()
        .find(|t| t.name == name || t.extensions.contains(&name.as_str()))
}

/// Look up a type by content type, ignoring parameters such as `; charset=`.
pub fn by_content_type(content_type: &str) -> Option<&'static MediaType> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    MEDIA_TYPES.iter().find(|t| t.content_type == essence)
}

/// Resolve a type name or alias to its canonical name.
pub fn canonical_name(name: &str) -> Option<&'static str> {
    by_name(name).map(|t| t.name)
}

/// Whether `name` is a canonical type name (and therefore a type selector).
pub fn is_type_name(name: &str) -> bool {
    MEDIA_TYPES.iter().any(|t| t.name == name)
}

pub fn content_type_for(name: &str) -> Option<&'static str> {
    by_name(name).map(|t| t.content_type)
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether these dimensions stay within an optional pixel ceiling.
    pub fn fits(&self, max_pixels: Option<u64>) -> bool {
        max_pixels.is_none_or(|max| self.pixel_count() <= max)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("jpeg", Some("jpeg"))]
    #[case("JPG", Some("jpeg"))]
    #[case("tif", Some("tiff"))]
    #[case("svg", Some("svg"))]
    #[case("resize", None)]
    fn test_canonical_name(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(canonical_name(input), expected);
    }

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type_for("png"), Some("image/png"));
        assert_eq!(
            by_content_type("image/svg+xml; charset=utf-8").map(|t| t.name),
            Some("svg")
        );
        assert!(by_content_type("text/html").is_none());
    }

    #[test]
    fn test_aliases_are_not_type_selectors() {
        assert!(is_type_name("jpeg"));
        assert!(!is_type_name("jpg"));
    }

    #[test]
    fn test_dimensions_display_and_limit() {
        let d = Dimensions::new(1920, 1080);
        assert_eq!(d.to_string(), "1920x1080");
        assert_eq!(d.pixel_count(), 2_073_600);
        assert!(d.fits(None));
        assert!(d.fits(Some(2_073_600)));
        assert!(!d.fits(Some(2_073_599)));
    }
}

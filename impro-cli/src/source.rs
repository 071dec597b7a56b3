//! Source media type detection.

use std::path::Path;

/// Pick the source type: explicit flag first, then the file extension, then
/// the leading bytes of the input.
pub fn detect(explicit: Option<&str>, path: Option<&Path>, head: &[u8]) -> Option<String> {
    if let Some(name) = explicit {
        return Some(media_types::canonical_name(name).unwrap_or(name).to_string());
    }

    path.and_then(Path::extension)
        .and_then(|ext| ext.to_str())
        .and_then(media_types::canonical_name)
        .or_else(|| sniff(head))
        .map(str::to_string)
}

fn sniff(head: &[u8]) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(head) {
        return format
            .extensions_str()
            .iter()
            .find_map(|ext| media_types::canonical_name(ext));
    }
    if head.starts_with(b"%PDF") {
        return Some("pdf");
    }
    if head.starts_with(b"%!PS") {
        return Some("eps");
    }

    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    (text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg")))
        .then_some("svg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[rstest]
    #[case(Some("JPG"), None, b"", Some("jpeg"))]
    #[case(Some("avif"), None, b"", Some("avif"))]
    #[case(None, Some("photo.jpg"), PNG_MAGIC, Some("jpeg"))]
    #[case(None, Some("photo.unknown"), PNG_MAGIC, Some("png"))]
    #[case(None, None, b"GIF89a\x01\x00\x01\x00", Some("gif"))]
    #[case(None, None, b"%PDF-1.7\n", Some("pdf"))]
    #[case(None, None, b"  <?xml version=\"1.0\"?>\n<svg xmlns=\"\">", Some("svg"))]
    #[case(None, None, b"plain text", None)]
    fn test_detect(
        #[case] explicit: Option<&str>,
        #[case] path: Option<&str>,
        #[case] head: &[u8],
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            detect(explicit, path.map(Path::new), head).as_deref(),
            expected
        );
    }
}

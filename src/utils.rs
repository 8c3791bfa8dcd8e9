use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

pub const ELLIPSIS: &str = "...";

/// Collapse runs of whitespace and truncate to at most `max_graphemes`
/// user-perceived characters, ellipsis included.
///
/// Counting is done on extended grapheme clusters, so combining marks,
/// emoji sequences and CJK text are never split.
pub fn truncate_str(s: &str, max_graphemes: usize) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.graphemes(true).count() <= max_graphemes {
        return collapsed;
    }

    let keep = max_graphemes.saturating_sub(ELLIPSIS.len());
    let mut result: String = collapsed.graphemes(true).take(keep).collect();
    result.truncate(result.trim_end().len());
    result.push_str(ELLIPSIS);
    result
}

/// Decode raw bytes into UTF-8: BOM, then Content-Type charset, then detection.
///
/// Invalid sequences are replaced rather than rejected; a half-broken page
/// still yields usable metadata.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(label) = content_type.and_then(extract_charset) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return decode_with(bytes, encoding);
        }
    }

    if std::str::from_utf8(bytes).is_ok() {
        return decode_with(bytes, encoding_rs::UTF_8);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    decode_with(bytes, detector.guess(None, true))
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim_matches([' ', '"', '\''].as_ref()).to_string())
        })
        .next()
}

/// Media type without parameters, lower-cased.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Resolve a possibly relative reference against the page it came from.
/// Only http(s) results are kept.
pub fn resolve_url(reference: &str, base: &Url) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let resolved = base.join(reference).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

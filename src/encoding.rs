//! Text decoding for documents and tool output.
//!
//! Everything crossreview writes is UTF-8 without a byte-order mark. Inputs
//! are tried against a small, ordered set of encodings; the first strict
//! decode wins.

use encoding_rs::{Encoding, GB18030, UTF_16BE, UTF_16LE};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Encodings attempted by [`decode_strict`], in order.
pub const ATTEMPTED_ENCODINGS: &[&str] = &["utf-8", "utf-16 (with BOM)", "gb18030"];

/// Decode bytes strictly, returning `None` when no attempted encoding fits.
///
/// UTF-16 is only considered when the input starts with a UTF-16 BOM, since
/// almost any even-length byte string is "valid" UTF-16.
pub fn decode_strict(bytes: &[u8]) -> Option<String> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return Some(strip_bom(text).to_string());
    }

    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes)
        && (encoding == UTF_16LE || encoding == UTF_16BE)
    {
        return encoding
            .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
            .map(|text| strip_bom(&text).to_string());
    }

    GB18030
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// Decode a chunk of tool output. Never fails: output capture must not take
/// the review down, so undecodable bytes become U+FFFD.
pub fn decode_lossy(bytes: &[u8]) -> String {
    decode_strict(bytes).unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

/// Remove a leading U+FEFF if present.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_utf8() {
        assert_eq!(decode_strict("héllo".as_bytes()).as_deref(), Some("héllo"));
    }

    #[test]
    fn test_decode_strips_utf8_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("# Review Index".as_bytes());
        assert_eq!(decode_strict(&bytes).as_deref(), Some("# Review Index"));
    }

    #[test]
    fn test_decode_utf16le_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "Task1".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_strict(&bytes).as_deref(), Some("Task1"));
    }

    #[test]
    fn test_decode_gbk_bytes() {
        // "中文" in GBK
        let bytes = [0xD6, 0xD0, 0xCE, 0xC4];
        assert_eq!(decode_strict(&bytes).as_deref(), Some("中文"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // 0xFF is not a valid lead byte in GB18030 and breaks UTF-8
        let bytes = [0x41, 0xFF, 0xFF, 0x42];
        assert_eq!(decode_strict(&bytes), None);
    }

    #[test]
    fn test_decode_lossy_never_fails() {
        let bytes = [0x41, 0xFF, 0xFF, 0x42];
        let text = decode_lossy(&bytes);
        assert!(text.starts_with('A'));
        assert!(text.ends_with('B'));
    }
}

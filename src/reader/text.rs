//! Plain-text passthrough: no tables, no images.

use crate::document::ExtractedContent;

/// Decode the bytes as UTF-8.
///
/// Lossy on purpose: a stray invalid byte becomes U+FFFD instead of failing
/// the job, matching the extraction ladder's degrade-don't-abort rule.
pub fn read(bytes: &[u8]) -> ExtractedContent {
    ExtractedContent {
        text: String::from_utf8_lossy(bytes).into_owned(),
        ..ExtractedContent::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_utf8() {
        let content = read("héllo wörld".as_bytes());
        assert_eq!(content.text, "héllo wörld");
        assert!(content.tables.is_empty());
        assert!(content.images.is_empty());
    }

    #[test]
    fn invalid_bytes_degrade_to_replacement_char() {
        let content = read(&[b'o', b'k', 0xFF, b'!']);
        assert!(content.text.starts_with("ok"));
        assert!(content.text.contains('\u{FFFD}'));
    }
}

//! Request body decoding and authorization checks

use std::io::Read;

use flate2::read::MultiGzDecoder;
use subtle::ConstantTimeEq;

/// Why a body could not be decoded
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeFailure {
    /// Decoded stream grew past the byte ceiling
    TooLarge,
    /// Not valid gzip
    Invalid(String),
}

/// True when any comma-separated `Content-Encoding` token is `gzip`
pub fn has_gzip_content_encoding(header: Option<&str>) -> bool {
    header.is_some_and(|value| {
        value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("gzip"))
    })
}

/// Gunzip `body`, reading at most `max + 1` decoded bytes.
///
/// The bound applies to the decoded stream, so a small compressed body
/// that expands past `max` is rejected without being fully inflated.
/// Empty and truncated streams are invalid.
pub fn gunzip_bounded(body: &[u8], max: u64) -> Result<Vec<u8>, DecodeFailure> {
    if body.is_empty() {
        return Err(DecodeFailure::Invalid("empty gzip body".to_string()));
    }
    let mut decoded = Vec::new();
    MultiGzDecoder::new(body)
        .take(max.saturating_add(1))
        .read_to_end(&mut decoded)
        .map_err(|e| DecodeFailure::Invalid(e.to_string()))?;
    if decoded.len() as u64 > max {
        return Err(DecodeFailure::TooLarge);
    }
    Ok(decoded)
}

/// Check the request's `Authorization` header against the expected value.
///
/// A blank expectation accepts everything. Otherwise the header must be
/// present and equal after trimming; comparison is constant-time.
pub fn authorization_matches(expected: &str, provided: Option<&[u8]>) -> bool {
    let expected = expected.trim();
    if expected.is_empty() {
        return true;
    }
    let Some(provided) = provided else {
        return false;
    };
    let provided = provided.trim_ascii();
    if provided.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(provided).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_content_encoding_detection() {
        assert!(has_gzip_content_encoding(Some("gzip")));
        assert!(has_gzip_content_encoding(Some("identity, GZIP")));
        assert!(!has_gzip_content_encoding(Some("br")));
        assert!(!has_gzip_content_encoding(Some("x-gzip-ish")));
        assert!(!has_gzip_content_encoding(None));
    }

    #[test]
    fn test_gunzip_within_limit() {
        let compressed = gzip(b"{\"id\":1}\n");
        assert_eq!(gunzip_bounded(&compressed, 64).unwrap(), b"{\"id\":1}\n");
        // Exactly at the ceiling is allowed
        assert_eq!(gunzip_bounded(&compressed, 9).unwrap().len(), 9);
    }

    #[test]
    fn test_gunzip_bomb_is_rejected() {
        let compressed = gzip(&vec![b'a'; 1024 * 1024]);
        assert!(compressed.len() < 16 * 1024);
        assert_eq!(gunzip_bounded(&compressed, 16 * 1024), Err(DecodeFailure::TooLarge));
    }

    #[test]
    fn test_gunzip_invalid_stream() {
        assert!(matches!(
            gunzip_bounded(b"definitely not gzip", 1024),
            Err(DecodeFailure::Invalid(_))
        ));
    }

    #[test]
    fn test_gunzip_empty_and_truncated() {
        assert_eq!(
            gunzip_bounded(b"", 1024),
            Err(DecodeFailure::Invalid("empty gzip body".to_string()))
        );

        let compressed = gzip(br#"{"id":"evt-1","action":"create"}"#);
        // Missing trailer
        let no_trailer = &compressed[..compressed.len() - 8];
        assert!(matches!(gunzip_bounded(no_trailer, 1024), Err(DecodeFailure::Invalid(_))));
        // Cut inside the deflate stream
        let half = &compressed[..compressed.len() / 2];
        assert!(matches!(gunzip_bounded(half, 1024), Err(DecodeFailure::Invalid(_))));
        // Header only
        assert!(matches!(gunzip_bounded(&compressed[..4], 1024), Err(DecodeFailure::Invalid(_))));
    }

    #[test]
    fn test_authorization_matrix() {
        assert!(authorization_matches("Bearer s3cret", Some(b"Bearer s3cret")));
        assert!(authorization_matches("  Bearer s3cret ", Some(b" Bearer s3cret")));
        assert!(!authorization_matches("Bearer s3cret", Some(b"Bearer other")));
        assert!(!authorization_matches("Bearer s3cret", Some(b"Bearer s3cre")));
        assert!(!authorization_matches("Bearer s3cret", None));
        assert!(!authorization_matches("Bearer s3cret", Some(b"   ")));
        assert!(authorization_matches("", None));
        assert!(authorization_matches("   ", Some(b"anything")));
    }
}

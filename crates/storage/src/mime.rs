//! Best-effort content type detection from leading bytes.

/// How many leading bytes backends read for sniffing.
pub const SNIFF_LEN: usize = 512;

const MAGIC: &[(&[u8], &str)] = &[
    (&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (&[b'P', b'K', 0x03, 0x04], "application/zip"),
    (&[0x1F, 0x8B], "application/gzip"),
    (&[0x42, 0x5A, 0x68], "application/x-bzip2"),
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], "application/x-xz"),
    (&[0x28, 0xB5, 0x2F, 0xFD], "application/zstd"),
    (b"PAR1", "application/vnd.apache.parquet"),
    (b"SQLite format 3\0", "application/vnd.sqlite3"),
];

/// Guess a content type from the first bytes of a file.
///
/// Returns `None` when nothing matches (including empty input) rather than
/// pretending everything is `application/octet-stream`.
///
/// ```
/// use siphon_storage::mime::sniff;
///
/// assert_eq!(sniff(b"%PDF-1.7 ..."), Some("application/pdf"));
/// assert_eq!(sniff(b"timestamp,tag,value\n"), Some("text/plain"));
/// assert_eq!(sniff(&[0x00, 0x01, 0x02]), None);
/// ```
pub fn sniff(head: &[u8]) -> Option<&'static str> {
    if let Some((_, mime)) = MAGIC.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Some(*mime);
    }
    let text = text_prefix(head)?;
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        return Some("application/xml");
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some("application/json");
    }
    if trimmed.is_empty() {
        return None;
    }
    Some("text/plain")
}

// The head may cut a multi-byte character in half; tolerate that, but not
// NUL bytes or anything else that isn't UTF-8.
fn text_prefix(head: &[u8]) -> Option<&str> {
    if head.contains(&0) {
        return None;
    }
    match std::str::from_utf8(head) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00], Some("image/png"))]
    #[case(&[0xFF, 0xD8, 0xFF, 0xE0], Some("image/jpeg"))]
    #[case(b"GIF89a....", Some("image/gif"))]
    #[case(&[0x1F, 0x8B, 0x08], Some("application/gzip"))]
    #[case(b"BZh91AY", Some("application/x-bzip2"))]
    #[case(b"PK\x03\x04rest", Some("application/zip"))]
    #[case(b"  <?xml version=\"1.0\"?>", Some("application/xml"))]
    #[case(b"{\"tag\": 1}", Some("application/json"))]
    #[case(b"hello", Some("text/plain"))]
    #[case(b"", None)]
    #[case(b"   \n", None)]
    #[case(&[0x00, 0x9F, 0x92], None)]
    #[case(&[0xC3, 0x28], None)]
    fn test_sniff(#[case] head: &[u8], #[case] expected: Option<&str>) {
        assert_eq!(sniff(head), expected);
    }

    #[test]
    fn test_truncated_utf8_is_still_text() {
        // "café" with the last byte of é cut off by the head limit
        let head = &"café".as_bytes()[..4];
        assert_eq!(sniff(head), Some("text/plain"));
    }
}

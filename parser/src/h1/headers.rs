//! An ordered, case-insensitive multimap of HTTP headers.

use super::tokens::{is_header_name_token, is_header_value_token};
use super::ParseError;

/// One `name: value` pair as it appeared on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    /// Raw header name, exactly as received (not case-normalized; use
    /// [`Header::eq_name`] or [`Headers::get`] for case-insensitive access).
    pub name: &'a [u8],
    /// Raw header value, with leading/trailing `OWS` already trimmed.
    pub value: &'a [u8],
}

impl<'a> Header<'a> {
    /// Case-insensitive comparison of this header's name against `name`.
    pub fn eq_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.as_bytes())
    }

    /// The value, interpreted as UTF-8 (lossily — header values may carry
    /// `obs-text`; a lossy conversion keeps this infallible).
    pub fn value_str(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.value)
    }

    /// The name, interpreted as UTF-8. Header-name bytes are always
    /// `tchar`, a strict subset of ASCII, so this is infallible in
    /// practice; invalid input (which [`Headers::parse`] would have
    /// already rejected) falls back to a lossy conversion.
    pub fn name_str(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.name)
    }
}

/// The maximum number of headers accepted per message. A generous but
/// finite bound protects against unbounded allocation from a malicious or
/// buggy peer.
pub const MAX_HEADERS: usize = 128;

/// An ordered multimap of headers: insertion order is preserved, and a
/// name may repeat (its values accumulate in order), matching §4.1's
/// "repeated names accumulate an ordered multi-value list".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers<'a> {
    entries: Vec<Header<'a>>,
}

impl<'a> Headers<'a> {
    /// An empty header set.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Parses a raw header block (everything between the request line and
    /// the trailing blank line, CRLF-terminated per header) into a
    /// [`Headers`] multimap.
    ///
    /// Rejects: invalid header-name/value bytes, a missing line
    /// terminator, more than [`MAX_HEADERS`] headers, and a second
    /// `Content-Length` or `Transfer-Encoding` header whose value
    /// disagrees with the first (the request-smuggling defense required
    /// by §4.1).
    pub fn parse(mut block: &'a [u8]) -> Result<Self, ParseError> {
        let mut headers = Headers::new();

        loop {
            if block.starts_with(b"\r\n") {
                return Ok(headers);
            }

            let name_end = block
                .iter()
                .position(|&b| b == b':')
                .ok_or(ParseError::HeaderName)?;
            let name = &block[..name_end];
            if name.is_empty() || !name.iter().all(|&b| is_header_name_token(b)) {
                return Err(ParseError::HeaderName);
            }

            let rest = &block[name_end + 1..];
            let line_end = find_crlf(rest).ok_or(ParseError::NewLine)?;
            let raw_value = &rest[..line_end];
            if !raw_value.iter().all(|&b| is_header_value_token(b)) {
                return Err(ParseError::HeaderValue);
            }
            let value = trim_ows(raw_value);

            headers.insert_checked(Header { name, value })?;
            if headers.entries.len() > MAX_HEADERS {
                return Err(ParseError::TooManyHeaders);
            }

            block = &rest[line_end + 2..];
        }
    }

    fn insert_checked(&mut self, header: Header<'a>) -> Result<(), ParseError> {
        if header.eq_name("content-length") || header.eq_name("transfer-encoding") {
            if let Some(existing) = self.entries.iter().find(|h| h.eq_name_of(&header)) {
                if existing.value != header.value {
                    return Err(ParseError::ConflictingFramingHeader);
                }
                // identical repeat: fall through without double-inserting,
                // matching the spirit of "reject conflicting duplicates"
                // while tolerating a byte-identical repeat.
                return Ok(());
            }
        }
        self.entries.push(header);
        Ok(())
    }

    /// All values for `name`, in the order they appeared.
    pub fn get_all<'b>(&'b self, name: &'b str) -> impl Iterator<Item = &'a [u8]> + 'b {
        self.entries
            .iter()
            .filter(move |h| h.eq_name(name))
            .map(|h| h.value)
    }

    /// The first value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&'a [u8]> {
        self.get_all(name).next()
    }

    /// The first value for `name` as a string, if present and valid UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&'a str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Iterates all headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Header<'a>> {
        self.entries.iter()
    }

    /// The number of header entries (counting repeats separately).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Content-Length`, per §4.1's `getContentLength`: the first integer
    /// value, or `0` if the header is absent. A present-but-unparseable
    /// value is also treated as absent (0), leaving framing decisions to
    /// length-based body handling rather than erroring here.
    pub fn content_length(&self) -> usize {
        self.get_str("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether `Transfer-Encoding: chunked` was sent (case-insensitive).
    /// Per §4.1, chunked *decoding* is a non-goal — this is only used to
    /// detect and reject the combination at the dispatch site.
    pub fn is_chunked(&self) -> bool {
        self.get_str("transfer-encoding")
            .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}

impl<'a> Header<'a> {
    fn eq_name_of(&self, other: &Header<'_>) -> bool {
        self.name.eq_ignore_ascii_case(other.name)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn trim_ows(buf: &[u8]) -> &[u8] {
    let start = buf
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(buf.len());
    let end = buf
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map(|p| p + 1)
        .unwrap_or(start);
    &buf[start..end]
}

/// Canonicalizes a header name to the conventional "Title-Case-Per-Segment"
/// form used for display and for building outgoing responses (e.g.
/// `content-type` -> `Content-Type`). Segments are delimited by `-`.
pub fn canonicalize_header_name(name: &[u8]) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_segment_start = true;
    for &b in name {
        if b == b'-' {
            out.push('-');
            at_segment_start = true;
            continue;
        }
        if at_segment_start {
            out.push(b.to_ascii_uppercase() as char);
        } else {
            out.push(b.to_ascii_lowercase() as char);
        }
        at_segment_start = false;
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_multiple_headers_in_order() {
        let block = b"Host: example.org\r\nAccept: */*\r\n\r\n";
        let headers = Headers::parse(block).unwrap();
        assert_eq!(headers.get("host"), Some(&b"example.org"[..]));
        assert_eq!(headers.get("Accept"), Some(&b"*/*"[..]));
    }

    #[test]
    fn accumulates_repeated_names_in_order() {
        let block = b"X-Trace: a\r\nX-Trace: b\r\n\r\n";
        let headers = Headers::parse(block).unwrap();
        let values: Vec<_> = headers.get_all("x-trace").collect();
        assert_eq!(values, vec![&b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn rejects_conflicting_duplicate_content_length() {
        let block = b"Content-Length: 5\r\nContent-Length: 6\r\n\r\n";
        assert_eq!(
            Headers::parse(block),
            Err(ParseError::ConflictingFramingHeader)
        );
    }

    #[test]
    fn tolerates_byte_identical_duplicate_content_length() {
        let block = b"Content-Length: 5\r\nContent-Length: 5\r\n\r\n";
        let headers = Headers::parse(block).unwrap();
        assert_eq!(headers.content_length(), 5);
    }

    #[test]
    fn rejects_conflicting_transfer_encoding() {
        let block = b"Transfer-Encoding: chunked\r\nTransfer-Encoding: identity\r\n\r\n";
        assert_eq!(
            Headers::parse(block),
            Err(ParseError::ConflictingFramingHeader)
        );
    }

    #[test]
    fn content_length_defaults_to_zero() {
        let headers = Headers::parse(b"\r\n").unwrap();
        assert_eq!(headers.content_length(), 0);
    }

    #[test]
    fn detects_chunked_case_insensitively() {
        let headers = Headers::parse(b"Transfer-Encoding: CHUNKED\r\n\r\n").unwrap();
        assert!(headers.is_chunked());
    }

    #[test]
    fn canonicalizes_hyphenated_names() {
        assert_eq!(canonicalize_header_name(b"content-type"), "Content-Type");
        assert_eq!(canonicalize_header_name(b"ETAG"), "Etag");
        assert_eq!(
            canonicalize_header_name(b"x-forwarded-for"),
            "X-Forwarded-For"
        );
    }

    #[test]
    fn rejects_invalid_header_name_bytes() {
        let block = b"Bad Name: x\r\n\r\n";
        assert_eq!(Headers::parse(block), Err(ParseError::HeaderName));
    }
}

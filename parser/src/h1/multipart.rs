//! `multipart/form-data` boundary validation and part parsing (§4.1.1).

use super::headers::Headers;

/// Failures while extracting a boundary or splitting parts.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum MultipartError {
    /// `Content-Type` had no `boundary` parameter.
    #[error("missing multipart boundary")]
    MissingBoundary,
    /// The boundary failed RFC 2046 validation.
    #[error("invalid multipart boundary")]
    InvalidBoundary,
    /// A part's header block or payload framing was malformed.
    #[error("malformed multipart part")]
    MalformedPart,
}

/// One part of a `multipart/form-data` body.
#[derive(Debug)]
pub struct MultipartPart<'a> {
    /// The `name` parameter of `Content-Disposition`.
    pub name: String,
    /// The `filename` parameter, if this part is a file upload.
    pub filename: Option<String>,
    /// The part's own `Content-Type`, if declared.
    pub content_type: Option<String>,
    /// The raw payload bytes.
    pub data: &'a [u8],
}

impl<'a> MultipartPart<'a> {
    /// The payload decoded as a UTF-8 string (lossily), for non-file
    /// fields.
    pub fn value_string(&self) -> String {
        String::from_utf8_lossy(self.data).into_owned()
    }
}

/// Extracts and validates the `boundary` parameter out of a
/// `multipart/form-data` `Content-Type` header value.
///
/// Validation runs before any part of the body is scanned for delimiters,
/// per §4.1.1's injection-prevention requirement: a boundary string that
/// has not first been proven to match the RFC 2046 grammar must never be
/// used to split untrusted bytes.
pub fn extract_boundary(content_type: &str) -> Result<&str, MultipartError> {
    let raw = content_type
        .split(';')
        .skip(1)
        .map(|p| p.trim())
        .find_map(|p| p.strip_prefix("boundary="))
        .ok_or(MultipartError::MissingBoundary)?;

    let unquoted = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };

    validate_boundary(unquoted)?;
    Ok(unquoted)
}

/// RFC 2046 `boundary := 0*69<bchars> bcharsnospace`, which this
/// specification tightens to a minimum length of 1:
/// 1-70 characters from `A-Za-z0-9'()+_,-./:=? `, and the last character
/// must not be a space.
fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    if boundary.is_empty() || boundary.len() > 70 {
        return Err(MultipartError::InvalidBoundary);
    }
    if !boundary.bytes().all(is_bchar) {
        return Err(MultipartError::InvalidBoundary);
    }
    if boundary.as_bytes()[boundary.len() - 1] == b' ' {
        return Err(MultipartError::InvalidBoundary);
    }
    Ok(())
}

fn is_bchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?' | b' '
        )
}

/// Splits a validated-boundary multipart body into its parts.
pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<MultipartPart<'a>>, MultipartError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut rest = body;

    // Skip to the first delimiter; a well-formed body starts with one
    // immediately, possibly preceded by a CRLF preamble artifact.
    let first = find(rest, delimiter).ok_or(MultipartError::MalformedPart)?;
    rest = &rest[first + delimiter.len()..];

    loop {
        if rest.starts_with(b"--") {
            // final boundary
            return Ok(parts);
        }
        rest = skip_crlf(rest).ok_or(MultipartError::MalformedPart)?;

        let header_end = find(rest, b"\r\n\r\n").ok_or(MultipartError::MalformedPart)?;
        let header_block = &rest[..header_end];
        let headers = Headers::parse(&rest[..header_end + 4])
            .map_err(|_| MultipartError::MalformedPart)?;
        let _ = header_block;

        let payload_start = header_end + 4;
        let next_delim = find(&rest[payload_start..], delimiter)
            .ok_or(MultipartError::MalformedPart)?;
        let mut payload_end = payload_start + next_delim;
        // the payload is followed by a CRLF before the next delimiter
        if payload_end >= 2 && &rest[payload_end - 2..payload_end] == b"\r\n" {
            payload_end -= 2;
        }

        let disposition = headers
            .get_str("content-disposition")
            .ok_or(MultipartError::MalformedPart)?;
        let name = extract_param(disposition, "name").ok_or(MultipartError::MalformedPart)?;
        let filename = extract_param(disposition, "filename");
        let content_type = headers.get_str("content-type").map(|s| s.to_string());

        parts.push(MultipartPart {
            name,
            filename,
            content_type,
            data: &rest[payload_start..payload_end],
        });

        rest = &rest[payload_start + next_delim + delimiter.len()..];
    }
}

fn skip_crlf(buf: &[u8]) -> Option<&[u8]> {
    buf.strip_prefix(b"\r\n")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_param(header_value: &str, param: &str) -> Option<String> {
    for segment in header_value.split(';').skip(1) {
        let segment = segment.trim();
        if let Some(value) = segment.strip_prefix(&format!("{param}=")) {
            let value = value.trim_matches('"');
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validates_rfc2046_boundary_grammar() {
        assert!(validate_boundary("abc123").is_ok());
        assert!(validate_boundary("----WebKitFormBoundary7MA4YWxkTrZu0gW").is_ok());
        assert!(validate_boundary("").is_err());
        assert!(validate_boundary(&"a".repeat(71)).is_err());
        assert!(validate_boundary("trailing space ").is_err());
        assert!(validate_boundary("has;semicolon").is_err());
    }

    #[test]
    fn extracts_quoted_and_unquoted_boundaries() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=abc").unwrap(),
            "abc"
        );
        assert_eq!(
            extract_boundary(r#"multipart/form-data; boundary="abc def""#).unwrap(),
            "abc def"
        );
    }

    #[test]
    fn rejects_missing_boundary() {
        assert_eq!(
            extract_boundary("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        );
    }

    #[test]
    fn rejects_invalid_boundary_before_scanning_body() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=bad*boundary"),
            Err(MultipartError::InvalidBoundary)
        );
    }

    #[test]
    fn parses_field_and_file_parts() {
        let boundary = "----WebKitFormBoundary7MA4YWxkTrZu0gW";
        let body = format!(
            "--{b}\r\n\
Content-Disposition: form-data; name=\"name\"\r\n\r\n\
John Doe\r\n\
--{b}\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"test.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
This is a test file content\r\n\
--{b}--\r\n",
            b = boundary
        );

        let parts = parse(body.as_bytes(), boundary).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "name");
        assert_eq!(parts[0].value_string(), "John Doe");
        assert_eq!(parts[1].name, "file");
        assert_eq!(parts[1].filename.as_deref(), Some("test.txt"));
        assert_eq!(parts[1].data, b"This is a test file content");
    }
}

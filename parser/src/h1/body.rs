//! Body parsing by `Content-Type`, per §4.1 of the base specification.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use super::headers::Headers;
use super::multipart::{self, MultipartError, MultipartPart};

/// The result of interpreting a request body according to its declared
/// `Content-Type`.
#[derive(Debug, Default)]
pub struct ParsedBody<'a> {
    /// `application/x-www-form-urlencoded` fields, or the non-file fields
    /// of a `multipart/form-data` body.
    pub form: HashMap<String, String>,
    /// `application/json`, parsed into a structured value. Per §4.1, an
    /// invalid JSON body leaves this `None` rather than erroring.
    pub json: Option<JsonValue>,
    /// `multipart/form-data` file parts, keyed by their field name.
    pub files: HashMap<String, MultipartPart<'a>>,
}

/// Interprets `body` according to `content_type`. Unrecognized content
/// types produce an empty [`ParsedBody`] — the host is still free to read
/// the raw bytes itself.
pub fn parse_body<'a>(
    content_type: Option<&str>,
    body: &'a [u8],
) -> Result<ParsedBody<'a>, MultipartError> {
    let Some(content_type) = content_type else {
        return Ok(ParsedBody::default());
    };
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/x-www-form-urlencoded" => Ok(ParsedBody {
            form: parse_urlencoded(body),
            ..Default::default()
        }),
        "application/json" => Ok(ParsedBody {
            json: serde_json::from_slice(body).ok(),
            ..Default::default()
        }),
        "multipart/form-data" => {
            let boundary = multipart::extract_boundary(content_type)?;
            let parts = multipart::parse(body, boundary)?;
            let mut parsed = ParsedBody::default();
            for part in parts {
                match part.filename {
                    Some(_) => {
                        parsed.files.insert(part.name.to_string(), part);
                    }
                    None => {
                        parsed
                            .form
                            .insert(part.name.to_string(), part.value_string());
                    }
                }
            }
            Ok(parsed)
        }
        _ => Ok(ParsedBody::default()),
    }
}

/// Convenience wrapper that reads `Content-Type` out of `headers` first.
pub fn parse_body_with_headers<'a>(
    headers: &Headers<'_>,
    body: &'a [u8],
) -> Result<ParsedBody<'a>, MultipartError> {
    parse_body(headers.get_str("content-type"), body)
}

fn parse_urlencoded(body: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    let mut map = HashMap::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut it = pair.splitn(2, '=');
        let key = percent_decode(it.next().unwrap_or(""));
        let value = percent_decode(it.next().unwrap_or(""));
        map.insert(key, value);
    }
    map
}

/// Decodes `application/x-www-form-urlencoded` percent-escapes and `+`
/// (space) in `s`. Invalid `%XX` escapes are passed through literally
/// rather than erroring, matching `parse_urlencoded`'s tolerance.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

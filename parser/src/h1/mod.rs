// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP/1.1 message parsing and serialization.

use crate::raw_request::RawRequest;

pub mod body;
pub mod headers;
pub mod multipart;
pub mod request;
pub mod response;
pub mod tokens;

/// Represents possible failures while parsing an HTTP/1.1 message.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ParseError {
    /// Invalid byte in method.
    #[error("invalid token in method")]
    Method,
    /// Invalid byte in target.
    #[error("invalid token in target")]
    Target,
    /// Invalid HTTP version.
    #[error("invalid version")]
    Version,
    /// Invalid byte in header name.
    #[error("invalid token in header name")]
    HeaderName,
    /// Invalid byte in header value.
    #[error("invalid token in header value")]
    HeaderValue,
    /// Invalid or missing new line.
    #[error("invalid or missing new line")]
    NewLine,
    /// Invalid whitespace.
    #[error("invalid whitespace")]
    Whitespace,
    /// A second `Content-Length` or `Transfer-Encoding` header was present
    /// with a conflicting value — rejected as a request-smuggling defense
    /// (§4.1 of the base specification).
    #[error("conflicting framing header")]
    ConflictingFramingHeader,
    /// Too many headers were present in the message.
    #[error("too many headers")]
    TooManyHeaders,
}

/// Result whose `Err` variant is [`ParseError`].
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Outcome of parsing an incomplete byte stream: either a complete value
/// was produced, or more bytes are needed before progress can continue.
/// This is distinct from [`ParseError`] — running out of buffered bytes is
/// expected and is not itself a parse failure.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome<T> {
    /// Enough bytes were present to produce `T`.
    Complete(T),
    /// Not enough bytes were buffered yet.
    Partial,
}

/// Consumes whitespace characters from `buf`.
///
/// Whitespace is defined by RFC 9110 Section 5.6.3:
/// ```abnf
/// OWS = *( SP / HTAB )
/// ```
#[inline]
pub fn discard_whitespace(buf: &mut RawRequest<'_>) {
    buf.take_until(|b| b != b' ' && b != b'\t');
}

/// Consumes whitespace characters from `buf`, requiring that at least one
/// whitespace character is encountered.
///
/// ```abnf
/// RWS = 1*( SP / HTAB )
/// ```
#[inline]
pub fn discard_required_whitespace(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    let pos = buf.pos();
    discard_whitespace(buf);
    if pos == buf.pos() {
        return Err(ParseError::Whitespace);
    }
    Ok(())
}

/// Consumes `buf` up to and including the next `b"\r\n"` sequence,
/// discarding everything iterated over.
#[inline]
pub fn take_after_newline(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    loop {
        match buf.next() {
            Some(b'\r') => {
                if buf.peek() == Some(b'\n') {
                    buf.next();
                    buf.slice();
                    return Ok(());
                }
            }
            Some(_) => {}
            None => return Err(ParseError::NewLine),
        }
    }
}

/// Returns `true` once `buf` contains a full header block, i.e. a blank
/// line (`CRLF CRLF`) terminating the headers.
pub fn has_complete_headers(buf: &[u8]) -> bool {
    find_header_terminator(buf).is_some()
}

/// Locates the offset of the `CRLF CRLF` header/body terminator, if present.
/// The returned offset is the index of the first byte of the *body*, i.e.
/// the header block (request line + headers, inclusive of the blank line)
/// is `&buf[..offset]`.
pub fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Splits `buf` into the raw header block (everything up to and including
/// the terminating blank line) and the remaining body bytes.
///
/// Returns `None` if `buf` does not yet contain a complete header block.
pub fn split_headers_and_body(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    find_header_terminator(buf).map(|offset| buf.split_at(offset))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_complete_headers() {
        assert!(has_complete_headers(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(!has_complete_headers(b"GET / HTTP/1.1\r\nHost: x\r\n"));
        assert!(!has_complete_headers(b""));
    }

    #[test]
    fn splits_headers_and_body() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody-bytes";
        let (headers, body) = split_headers_and_body(buf).unwrap();
        assert_eq!(headers, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(body, b"body-bytes");
    }

    #[test]
    fn split_returns_none_when_incomplete() {
        assert!(split_headers_and_body(b"GET / HTTP/1.1\r\n").is_none());
    }
}

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

//! HTTP/1.1 request-line and header parsing.

use core::str::from_utf8;

use super::headers::Headers;
use super::tokens::is_request_target_token;
use super::{take_after_newline, ParseError, ParseResult};
use crate::method::Method;
use crate::raw_request::RawRequest;
use crate::version::Version;

/// A parsed request line plus header block, borrowing from the buffer it
/// was parsed out of.
///
/// Only the start-line and headers live here; the body is handled
/// separately by [`crate::h1::body`] once the caller knows how many bytes
/// to wait for (`Content-Length`).
#[derive(Debug)]
pub struct H1Request<'a> {
    /// The request method.
    pub method: Method,
    /// The request target, e.g. `/index.html?q=1`.
    pub target: &'a str,
    /// The declared protocol version.
    pub version: Version,
    /// Parsed headers.
    pub headers: Headers<'a>,
}

impl<'a> H1Request<'a> {
    /// Parses a full header block: `METHOD SP target SP HTTP/x.y CRLF
    /// (header CRLF)* CRLF`. `buf` must already be known-complete (see
    /// [`crate::h1::has_complete_headers`]) — this function does not
    /// distinguish "malformed" from "not enough bytes yet".
    pub fn parse(buf: &'a [u8]) -> ParseResult<Self> {
        let mut cursor = RawRequest::new(buf);

        let method = Self::parse_method(&mut cursor)?;
        let target = Self::parse_target(&mut cursor)?;
        let version = Self::parse_version(&mut cursor)?;
        take_after_newline(&mut cursor)?;

        let headers = Headers::parse(cursor.remaining())?;

        Ok(H1Request {
            method,
            target,
            version,
            headers,
        })
    }

    fn parse_method(buf: &mut RawRequest<'a>) -> ParseResult<Method> {
        let token = buf.take_until(|b| b == b' ').ok_or(ParseError::Method)?;
        buf.next(); // consume the space
        buf.slice();
        Method::from_bytes(token)
    }

    fn parse_target(buf: &mut RawRequest<'a>) -> ParseResult<&'a str> {
        for b in buf.by_ref() {
            if b == b' ' {
                let slice = buf.slice_skip(1).map_err(|_| ParseError::Target)?;
                return from_utf8(slice).map_err(|_| ParseError::Target);
            } else if !is_request_target_token(b) {
                return Err(ParseError::Target);
            }
        }
        Err(ParseError::Target)
    }

    fn parse_version(buf: &mut RawRequest<'a>) -> ParseResult<Version> {
        let token = buf.take_until(|b| b == b'\r').ok_or(ParseError::Version)?;
        Version::from_bytes(token)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_simple_get_request() {
        let req = H1Request::parse(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.target, "/hello");
        assert_eq!(req.version, Version::H1_1);
        assert_eq!(req.headers.get("host"), Some(&b"x"[..]));
    }

    #[test]
    fn parses_request_with_query_string() {
        let req = H1Request::parse(b"GET /a?x=1&y=2 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.target, "/a?x=1&y=2");
    }

    #[test]
    fn rejects_unknown_method() {
        let err = H1Request::parse(b"FETCH / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::Method);
    }

    #[test]
    fn rejects_missing_version() {
        let err = H1Request::parse(b"GET /\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::Version);
    }

    #[test]
    fn rejects_bad_target_byte() {
        let err = H1Request::parse(b"GET /\x01 HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::Target);
    }
}

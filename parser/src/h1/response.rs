//! Response model and serialization (§4.1.3).

use std::io::{self, Write};

use crate::status::Status;
use crate::version::Version;

/// An outgoing HTTP/1.1 response.
///
/// Headers are stored as an ordered list of `(name, value)` pairs so that
/// multi-value headers can be represented and emitted as one line per
/// value, per §4.1.3.
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    status: Status,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Starts building a response with just a status line; no headers or
    /// body yet.
    pub fn new(version: Version, status: Status) -> Self {
        Self {
            version,
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Equivalent to [`Response::new`] with a plain-text-friendly name,
    /// matching the teacher's `new_with_status_line` constructor.
    pub fn new_with_status_line(version: Version, status: Status) -> Self {
        Self::new(version, status)
    }

    /// A plain-text failure body carrying just the reason phrase, per §7's
    /// "user-visible failure bodies are plain text ... no HTML".
    pub fn plain_error(version: Version, status: Status) -> Self {
        Self::new(version, status).with_body(status.reason_phrase().as_bytes().to_vec())
    }

    /// Appends a header. Adding the same name twice produces a multi-value
    /// header, each emitted on its own line.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the response body, replacing any previous body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// The response status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The response body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether a header named `name` was already set (case-insensitive).
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Serializes the full response (status line, headers, blank line,
    /// body) to a single owned buffer.
    ///
    /// If `Content-Length` was not set explicitly, it is computed from the
    /// body and added, per §4.1.3.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        self.write_head(&mut out).expect("writing to Vec cannot fail");
        out.extend_from_slice(&self.body);
        out
    }

    /// Writes just the status line and headers (including the blank line
    /// terminator) to `out`, without the body. Used by callers streaming a
    /// body of their own rather than through [`Response::body`], so an
    /// explicit `Content-Length` header should already be set: with no body
    /// bytes here to measure, an unset one is written as `Content-Length: 0`.
    pub fn write_head_to(&self, out: &mut impl Write) -> io::Result<()> {
        self.write_head(out)
    }

    /// Writes just the status line and headers (including the blank line
    /// terminator) to `out`.
    fn write_head(&self, out: &mut impl Write) -> io::Result<()> {
        write!(
            out,
            "{} {} {}\r\n",
            self.version,
            self.status.code(),
            self.status.reason_phrase()
        )?;

        for (name, value) in &self.headers {
            write!(out, "{name}: {value}\r\n")?;
        }
        if !self.has_header("content-length") {
            write!(out, "Content-Length: {}\r\n", self.body.len())?;
        }
        write!(out, "\r\n")
    }

    /// Writes the full response to `sink` in fixed-size chunks, bounding
    /// peak memory for large bodies, per §4.1.3's "buffered variant".
    pub fn write_buffered(&self, sink: &mut impl Write, chunk_size: usize) -> io::Result<()> {
        assert!(chunk_size > 0);
        let mut head = Vec::new();
        self.write_head(&mut head)?;
        for chunk in head.chunks(chunk_size) {
            sink.write_all(chunk)?;
        }
        for chunk in self.body.chunks(chunk_size) {
            sink.write_all(chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serializes_status_line_headers_and_body() {
        let resp = Response::new(Version::H1_1, Status::Ok)
            .header("Content-Type", "text/plain")
            .with_body(b"Hello World".to_vec());

        let bytes = resp.serialize();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\nHello World"));
    }

    #[test]
    fn does_not_duplicate_explicit_content_length() {
        let resp = Response::new(Version::H1_1, Status::NoContent)
            .header("Content-Length", "0")
            .with_body(Vec::new());
        let text = String::from_utf8(resp.serialize()).unwrap();
        assert_eq!(text.matches("Content-Length").count(), 1);
    }

    #[test]
    fn emits_one_line_per_multi_value_header() {
        let resp = Response::new(Version::H1_1, Status::Ok)
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2");
        let text = String::from_utf8(resp.serialize()).unwrap();
        assert_eq!(text.matches("Set-Cookie").count(), 2);
    }

    #[test]
    fn buffered_write_reproduces_unbuffered_bytes() {
        let resp = Response::new(Version::H1_1, Status::Ok).with_body(vec![b'x'; 37]);
        let mut buffered = Vec::new();
        resp.write_buffered(&mut buffered, 8).unwrap();
        assert_eq!(buffered, resp.serialize());
    }

    #[test]
    fn write_head_to_omits_body() {
        let resp = Response::new(Version::H1_1, Status::Ok)
            .header("Content-Length", "1234")
            .header("Content-Type", "application/octet-stream");
        let mut head = Vec::new();
        resp.write_head_to(&mut head).unwrap();
        let text = String::from_utf8(head).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 1234\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}

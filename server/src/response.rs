//! The response type produced by the host (§3), wrapping the wire codec's
//! [`loopserve_parser::h1::response::Response`] with the keep-alive and
//! streaming concerns §4.3.3/§4.1.3 add on top.

use std::io::{self, Read, Write};

use loopserve_parser::Status;

/// A response body: either already-materialized bytes, or a reader the
/// server will drain into bytes before framing (§4.1.3: "otherwise the
/// body is fully materialized, its length measured").
pub enum Body {
    /// A body whose bytes are already known.
    Bytes(Vec<u8>),
    /// A body to be read to completion before sending.
    Stream(Box<dyn Read + Send>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

/// A response the host hands to [`crate::server::Server::respond`].
#[derive(Debug)]
pub struct Response {
    status: Status,
    headers: Vec<(String, String)>,
    body: Body,
}

impl Response {
    /// Starts a response with a status and no body.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Bytes(Vec::new()),
        }
    }

    /// Appends a header; repeated names become multi-value headers.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets an in-memory body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Bytes(body.into());
        self
    }

    /// Sets a streamed body, read to completion when the response is
    /// serialized.
    pub fn with_stream(mut self, reader: impl Read + Send + 'static) -> Self {
        self.body = Body::Stream(Box::new(reader));
        self
    }

    /// The response status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Overrides the status, keeping any headers/body already set.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Whether a header named `name` is already set.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Materializes the body (draining any stream) and builds the wire
    /// codec's [`loopserve_parser::h1::response::Response`], ready to
    /// serialize. Consumes `self`.
    pub fn into_wire(self, version: loopserve_parser::Version) -> io::Result<loopserve_parser::h1::response::Response> {
        let bytes = match self.body {
            Body::Bytes(b) => b,
            Body::Stream(mut r) => {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf)?;
                buf
            }
        };
        let mut wire = loopserve_parser::h1::response::Response::new(version, self.status);
        for (name, value) in self.headers {
            wire = wire.header(name, value);
        }
        Ok(wire.with_body(bytes))
    }

    /// The chunk size used to bound peak memory while writing a
    /// [`Body::Stream`] body across the wire (§4.1.3's "buffered variant").
    const STREAM_CHUNK_SIZE: usize = 64 * 1024;

    /// Writes this response through `write_chunk`, one chunk at a time,
    /// instead of [`Response::into_wire`]'s materialize-then-serialize.
    ///
    /// A `Body::Bytes` response is framed and written through the wire
    /// codec's [`loopserve_parser::h1::response::Response::write_buffered`].
    /// A `Body::Stream` response writes its header immediately, then copies
    /// the reader across in `STREAM_CHUNK_SIZE`-byte pieces, never holding
    /// more than one chunk of body in memory at once. A streamed body must
    /// already carry an explicit `Content-Length` header — chunked
    /// transfer-encoding isn't implemented, so the length has to be known
    /// up front.
    pub fn write_to(
        self,
        version: loopserve_parser::Version,
        write_chunk: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> io::Result<()> {
        match self.body {
            Body::Bytes(bytes) => {
                let mut wire = loopserve_parser::h1::response::Response::new(version, self.status);
                for (name, value) in self.headers {
                    wire = wire.header(name, value);
                }
                let wire = wire.with_body(bytes);
                let mut sink = ChunkSink(write_chunk);
                wire.write_buffered(&mut sink, Self::STREAM_CHUNK_SIZE)
            }
            Body::Stream(mut reader) => {
                let mut head = loopserve_parser::h1::response::Response::new(version, self.status);
                let has_length = self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-length"));
                for (name, value) in self.headers {
                    head = head.header(name, value);
                }
                if !has_length {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "a streamed response body requires an explicit Content-Length header",
                    ));
                }
                let mut head_bytes = Vec::new();
                head.write_head_to(&mut head_bytes)?;
                write_chunk(&head_bytes)?;

                let mut buf = vec![0u8; Self::STREAM_CHUNK_SIZE];
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        return Ok(());
                    }
                    write_chunk(&buf[..n])?;
                }
            }
        }
    }
}

/// Adapts a `write_chunk` closure to [`std::io::Write`] so
/// [`loopserve_parser::h1::response::Response::write_buffered`] can write
/// through it directly.
struct ChunkSink<'a>(&'a mut dyn FnMut(&[u8]) -> io::Result<()>);

impl Write for ChunkSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (self.0)(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

//! Per-client buffered socket wrapper with timers and keep-alive counters
//! (§4.2), grounded on the teacher's `src/connection.rs` `ConnectionType`
//! split between plaintext and TLS-terminated sockets.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Token;

use crate::net::TcpStream;

/// A stable identifier for a pooled connection: a slab index plus a
/// generation counter, per §9's design note ("a stale reference in
/// `respond()` is detected and the response dropped"). Reusing a slab slot
/// bumps the generation, so a `ConnId` captured before the slot was reused
/// compares unequal to the slot's current identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// The lifecycle state of a pooled connection (§3's Connection invariant:
/// "exactly one state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for a complete header block.
    ReadingHeaders,
    /// Headers are framed; waiting for the rest of the body.
    ReadingBody,
    /// A full request has been handed to the request queue.
    InQueue,
    /// `get_request()` has popped this connection; a `respond()` is owed.
    AwaitingResponse,
    /// A response is being written back to the socket.
    WritingResponse,
    /// Between requests on a reused keep-alive connection.
    IdleKeepalive,
    /// Closed; eligible for removal from the pool.
    Closed,
}

/// Either a plaintext socket or a TLS-terminated one, mirroring the
/// teacher's `ConnectionType<S>`.
pub enum Transport<S: TcpStream> {
    /// A bare TCP socket.
    Plain(S),
    /// A TLS-terminated socket.
    Tls(Box<rustls::ServerConnection>, S),
}

impl<S: TcpStream> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain"),
            Transport::Tls(..) => f.write_str("Transport::Tls"),
        }
    }
}

/// Per-connection cached header metadata (§4.3.2: "cache both; else
/// reuse"). Holding the actual borrowed `Headers<'a>` here would make
/// `Connection` self-referential, so only the two facts the pipeline
/// needs before it re-parses are cached: where the header block ends and
/// how many body bytes to wait for.
#[derive(Debug, Clone, Copy)]
pub struct CachedHeaders {
    /// Offset into the read buffer where the header block ends (and the
    /// body, if any, begins).
    pub header_block_end: usize,
    /// `Content-Length` of the framed request, or 0 if absent.
    pub content_length: usize,
}

/// A pooled, non-blocking client connection.
pub struct Connection<S: TcpStream> {
    transport: Transport<S>,
    token: Token,
    remote_addr: SocketAddr,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    last_activity: Instant,
    request_start: Option<Instant>,
    request_count: u64,
    keep_alive: bool,
    cached_headers: Option<CachedHeaders>,
    state: ConnState,
}

impl<S: TcpStream> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("token", &self.token)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state)
            .field("request_count", &self.request_count)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl<S: TcpStream> Connection<S> {
    /// Wraps a freshly accepted plaintext socket.
    pub fn plain(stream: S, remote_addr: SocketAddr, token: Token, buffer_size: usize) -> Self {
        Self::new(Transport::Plain(stream), remote_addr, token, buffer_size)
    }

    /// Wraps a freshly accepted socket behind a server-side TLS session.
    pub fn tls(
        stream: S,
        tls: rustls::ServerConnection,
        remote_addr: SocketAddr,
        token: Token,
        buffer_size: usize,
    ) -> Self {
        Self::new(
            Transport::Tls(Box::new(tls), stream),
            remote_addr,
            token,
            buffer_size,
        )
    }

    fn new(transport: Transport<S>, remote_addr: SocketAddr, token: Token, buffer_size: usize) -> Self {
        Self {
            transport,
            token,
            remote_addr,
            read_buf: Vec::with_capacity(buffer_size),
            write_buf: Vec::new(),
            last_activity: Instant::now(),
            request_start: None,
            request_count: 0,
            keep_alive: true,
            cached_headers: None,
            state: ConnState::ReadingHeaders,
        }
    }

    /// This connection's mio registration token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// The remote peer's address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The connection's current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Transitions the connection to a new lifecycle state.
    pub fn set_state(&mut self, state: ConnState) {
        self.state = state;
    }

    /// Whether this connection is still usable (not closed).
    pub fn is_valid(&self) -> bool {
        self.state != ConnState::Closed
    }

    /// Closes the connection, shutting down the underlying socket. Safe to
    /// call more than once.
    pub fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        let stream = match &self.transport {
            Transport::Plain(s) => s,
            Transport::Tls(_, s) => s,
        };
        let _ = stream.shutdown(std::net::Shutdown::Both);
        self.state = ConnState::Closed;
    }

    /// Reads available bytes into the internal buffer, draining the
    /// socket until it would block. Returns the number of bytes read, or
    /// `Ok(0)` on a graceful EOF (the caller should treat this as "close
    /// this connection", per §4.2).
    pub fn fill(&mut self) -> io::Result<usize> {
        self.last_activity = Instant::now();
        let mut total = 0;
        let mut chunk = [0u8; 4096];
        loop {
            let n = match self.raw_read(&mut chunk) {
                Ok(0) => {
                    return if total > 0 { Ok(total) } else { Ok(0) };
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return if total > 0 { Ok(total) } else { Err(e) };
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.read_buf.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(tls, s) => {
                match tls.read_tls(s) {
                    Ok(0) => return Ok(0),
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(e),
                    Err(e) => return Err(e),
                }
                tls.process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                tls.reader().read(buf)
            }
        }
    }

    /// The bytes buffered so far (not yet consumed by the request
    /// pipeline).
    pub fn buffer(&self) -> &[u8] {
        &self.read_buf
    }

    /// Drops the first `n` bytes of the buffer (they have been consumed
    /// into a request).
    pub fn consume(&mut self, n: usize) {
        self.read_buf.drain(..n.min(self.read_buf.len()));
    }

    /// Clears the read buffer and cached header metadata, preparing the
    /// connection for its next request.
    pub fn clear_buffer(&mut self) {
        self.read_buf.clear();
        self.cached_headers = None;
        self.request_start = None;
    }

    /// Drops the `consumed` bytes belonging to the request that was just
    /// framed and resets per-request state, preserving any bytes already
    /// buffered beyond it (a pipelined next request), per §4.3.2.
    pub fn finish_request(&mut self, consumed: usize) {
        self.consume(consumed);
        self.cached_headers = None;
        self.request_start = None;
    }

    /// The cached header metadata for the in-flight request, if headers
    /// have already been parsed this cycle.
    pub fn cached_headers(&self) -> Option<CachedHeaders> {
        self.cached_headers
    }

    /// Caches header metadata for the in-flight request.
    pub fn set_cached_headers(&mut self, cached: CachedHeaders) {
        self.cached_headers = Some(cached);
    }

    /// Queues `bytes` for writing and flushes as much as possible without
    /// blocking. Returns `true` if the whole buffer was written.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<bool> {
        self.write_buf.extend_from_slice(bytes);
        self.flush()
    }

    /// Flushes any queued write bytes. Returns `true` once fully drained.
    pub fn flush(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            let n = match self.raw_write(&self.write_buf.clone()) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            self.write_buf.drain(..n);
        }
        Ok(true)
    }

    fn raw_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(tls, s) => {
                let n = tls.writer().write(buf)?;
                while tls.wants_write() {
                    match tls.write_tls(s) {
                        Ok(_) => {}
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e),
                    }
                }
                Ok(n)
            }
        }
    }

    /// Starts (or restarts) the per-request read timer; a no-op once
    /// already started for the current request, per §4.3.2 ("record the
    /// request timer if unset").
    pub fn start_request_timer(&mut self) {
        if self.request_start.is_none() {
            self.request_start = Some(Instant::now());
        }
    }

    /// Whether the in-flight request has exceeded `timeout` since its
    /// first byte arrived.
    pub fn is_request_timed_out(&self, timeout: Duration) -> bool {
        self.request_start
            .map(|start| start.elapsed() > timeout)
            .unwrap_or(false)
    }

    /// Whether the connection has been idle (no activity at all) longer
    /// than `timeout`.
    pub fn is_idle_timed_out(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Marks the connection as having had activity just now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Sets whether this connection should be reused after the current
    /// response (resolved once per request per §4.3.2).
    pub fn set_keepalive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Whether this connection should be kept open after the current
    /// response.
    pub fn is_keepalive(&self) -> bool {
        self.keep_alive
    }

    /// The number of requests already served on this connection.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Increments the served-request counter.
    pub fn increment_request_count(&mut self) {
        self.request_count += 1;
    }
}

/// A shared handle to a pooled connection. The request queue and the
/// pending-responses map hold these (plus a [`ConnId`]) as weak
/// back-references rather than owning the connection outright, per §5's
/// "Resource ownership" rule.
pub type SharedConnection<S> = Arc<std::sync::Mutex<Connection<S>>>;

//! The server facade (§4.3): construction, the host-polled main loop
//! contract (`has_request`/`get_request`/`respond`), graceful shutdown,
//! and the attachment points for static files and WebSocket endpoints.
//!
//! Grounded on the teacher's `server/src/listener.rs` event loop, but
//! reshaped around an explicit pull API instead of an internally driven
//! `run()` loop: the host calls `has_request()` on every tick of its own
//! loop, and each call drives one non-blocking pass of accept, read, and
//! pipeline-processing work before reporting whether a request is ready.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Token;

use loopserve_parser::h1::request::H1Request;
use loopserve_parser::h1::{self, headers::Headers as WireHeaders};
use loopserve_parser::ws::Frame;
use loopserve_parser::{Method, Status, Version};

use crate::config::Config;
use crate::connection::{CachedHeaders, ConnId, ConnState, Connection};
use crate::error::ServerError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pool::ConnectionPool;
use crate::rate_limiter::RateLimiter;
use crate::request::{OwnedHeaders, ParsedBody, Request, ServerParams, UploadStatus, UploadedFile};
use crate::response::Response;
use crate::static_cache::StaticCache;
use crate::static_handler::StaticHandler;
use crate::tasks::{Task, TaskRegistry};
use crate::tempfile::TempFileManager;
use crate::ws::WebSocketServer;

type MTcpStream = mio::net::TcpStream;
type MTcpListener = mio::net::TcpListener;

/// A request that has been framed and handed off, waiting for the host
/// to pop it via [`Server::get_request`].
struct QueuedRequest {
    id: ConnId,
    request: Request,
    temp_paths: Vec<std::path::PathBuf>,
}

/// A response owed to a connection the host has already popped a request
/// from, tracked so a stale `respond()` (the connection closed or its
/// slot was reused in the meantime) can be detected and dropped, per §9.
///
/// Also carries the request's upload temp-file paths, so `respond()` can
/// clean up whatever the handler didn't `move_to()` once its response is
/// written, without touching temp files any other in-flight request still
/// owns (§4.1.2).
struct PendingResponse {
    id: ConnId,
    temp_paths: Vec<std::path::PathBuf>,
}

/// Whether a connection completing its current response should be kept
/// open for another request or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeepAliveDecision {
    Close,
    Reuse,
}

/// An embeddable, non-blocking HTTP/1.1 (+ optional TLS, + optional
/// WebSocket upgrade) server driven entirely by a host's own polling
/// loop (§1, §4.3).
///
/// `Server` never spawns threads or blocks; every public method either
/// returns immediately or performs a single bounded, non-blocking pass
/// of work. The host is expected to call [`Server::has_request`] (or
/// [`Server::tick`] directly, if it has no requests to pull yet) once
/// per iteration of its own loop.
pub struct Server {
    config: Config,
    listener: Option<MTcpListener>,
    pool: ConnectionPool<MTcpStream>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    request_queue: VecDeque<QueuedRequest>,
    pending_responses: VecDeque<PendingResponse>,
    static_handler: Option<StaticHandler>,
    public_path: Option<String>,
    websocket: Option<WebSocketServer>,
    ws_upgraded: std::collections::HashSet<ConnId>,
    rate_limiter: Option<RateLimiter>,
    tempfiles: Arc<TempFileManager>,
    tasks: TaskRegistry,
    metrics: Metrics,
    worker_id: Option<u32>,
    running: bool,
    next_token: usize,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("running", &self.running)
            .field("connections", &self.pool.len())
            .field("queued_requests", &self.request_queue.len())
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl Server {
    /// Builds a server from `config`. No socket is bound yet; call
    /// [`Server::start`] to begin listening.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            listener: None,
            pool: ConnectionPool::new(usize::MAX),
            tls_config: None,
            request_queue: VecDeque::new(),
            pending_responses: VecDeque::new(),
            static_handler: None,
            public_path: None,
            websocket: None,
            ws_upgraded: std::collections::HashSet::new(),
            rate_limiter: None,
            tempfiles: Arc::new(TempFileManager::new(std::env::temp_dir())),
            tasks: TaskRegistry::new(),
            metrics: Metrics::new(),
            worker_id: None,
            running: false,
            next_token: 0,
        }
    }

    /// Binds the listening socket and prepares TLS/rate-limiting/static
    /// state from the configuration. Returns `false` (logging the cause)
    /// rather than propagating an error, per §4.3's "fallible setup
    /// collapses to a boolean at the public boundary".
    pub fn start(&mut self) -> bool {
        if self.running {
            log::warn!("start() called while already running");
            return true;
        }

        let addr: SocketAddr = match format!("{}:{}", self.config.host(), self.config.port()).parse() {
            Ok(addr) => addr,
            Err(err) => {
                log::error!("invalid bind address: {err}");
                return false;
            }
        };

        let listener = match <MTcpListener as crate::net::TcpListener<MTcpStream>>::bind(addr) {
            Ok(l) => l,
            Err(err) => {
                log::error!("{}", ServerError::Bind { addr: addr.to_string(), source: err });
                return false;
            }
        };

        if self.config.tls_enable() {
            match load_tls_config(&self.config) {
                Ok(cfg) => self.tls_config = Some(Arc::new(cfg)),
                Err(err) => {
                    log::error!("{err}");
                    return false;
                }
            }
        }

        if self.config.rate_limit_enable() {
            self.rate_limiter = Some(RateLimiter::new(
                self.config.rate_limit_requests(),
                self.config.rate_limit_window(),
            ));
        }

        self.pool = ConnectionPool::new(self.config.max_connections());
        self.listener = Some(listener);
        self.running = true;
        log::info!("server listening on {addr}");
        true
    }

    /// Stops accepting new connections and drops the listener, leaving
    /// already-open connections alone. Idempotent.
    pub fn stop(&mut self) {
        self.listener = None;
        self.running = false;
        log::info!("server stopped accepting new connections");
    }

    /// Tears down all state (connections, queued requests, pending
    /// responses, temp files) and restores the server to its
    /// just-constructed condition, without rebinding the listening
    /// socket.
    pub fn reset(&mut self) {
        self.listener = None;
        self.pool = ConnectionPool::new(self.config.max_connections());
        self.request_queue.clear();
        self.pending_responses.clear();
        self.ws_upgraded.clear();
        self.tempfiles.cleanup();
        self.metrics = Metrics::new();
        self.running = false;
    }

    /// Stops and restarts the listener, preserving configuration.
    /// Returns `false` if the rebind fails.
    pub fn restart(&mut self) -> bool {
        self.stop();
        self.start()
    }

    /// Drains in-flight work for up to `timeout`, flushing pending
    /// responses and WebSocket outbound frames, then stops accepting and
    /// closes every remaining connection (§4.3.4). Returns `true` if
    /// everything drained before the deadline.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            self.tick_for_shutdown();
            if self.request_queue.is_empty() && self.pending_responses.is_empty() && self.pool.is_empty() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let drained = self.request_queue.is_empty() && self.pending_responses.is_empty() && self.pool.is_empty();
        for (_, conn) in self.pool.iter() {
            if let Ok(mut c) = conn.lock() {
                c.close();
            }
        }
        self.pool = ConnectionPool::new(self.config.max_connections());
        drained
    }

    /// Runs one non-blocking pass of accept/read/dispatch work without
    /// consulting the request queue; used internally by
    /// [`Server::shutdown`] to keep draining without pulling new work in.
    fn tick_for_shutdown(&mut self) {
        self.tasks.resume_all();
        self.read_connections();
        self.process_http_requests();
        self.run_ping_scheduler();
        self.flush_all_websocket_outbound();
        self.reap_timed_out();
    }

    /// Performs one tick of work (accept, read, frame, dispatch) and
    /// reports whether a request is now ready for [`Server::get_request`].
    /// Wrapped in `catch_unwind` so a panic anywhere in the pipeline is
    /// logged and swallowed rather than unwinding into the host, per §7's
    /// "the polling entry points must never panic".
    pub fn has_request(&mut self) -> bool {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.tick();
            !self.request_queue.is_empty()
        }));
        result.unwrap_or_else(|_| {
            log::error!("has_request panicked internally; reporting no request this tick");
            false
        })
    }

    fn tick(&mut self) {
        self.tasks.resume_all();
        if self.running {
            self.accept_connections();
        }
        self.read_connections();
        self.process_http_requests();
        self.run_ping_scheduler();
        self.flush_all_websocket_outbound();
        self.reap_timed_out();
    }

    /// Pops the oldest framed request, transitioning its connection to
    /// `AwaitingResponse`. Returns `None` if no request is queued.
    pub fn get_request(&mut self) -> Option<Request> {
        let queued = self.request_queue.pop_front()?;
        if let Some(conn) = self.pool.get(queued.id) {
            if let Ok(mut c) = conn.lock() {
                c.set_state(ConnState::AwaitingResponse);
            }
        }
        self.pending_responses.push_back(PendingResponse {
            id: queued.id,
            temp_paths: queued.temp_paths,
        });
        Some(queued.request)
    }

    /// Whether a `respond()` is currently owed for some popped request.
    pub fn has_pending_response(&self) -> bool {
        !self.pending_responses.is_empty()
    }

    /// Sends `response` for the oldest outstanding pending response. A
    /// stale or already-closed connection causes the response to be
    /// silently dropped (logged at debug level), per §9's "a stale
    /// reference in respond() is detected and the response dropped".
    ///
    /// This matches the teacher's single-outstanding-response-per-tick
    /// idiom: hosts that pop several requests before responding must
    /// call `respond()` in the same order they called `get_request()`.
    pub fn respond(&mut self, response: Response) {
        let Some(pending) = self.pending_responses.pop_front() else {
            log::warn!("respond() called with no pending response");
            return;
        };
        self.write_response_now(pending.id, response);
        self.tempfiles.cleanup_paths(&pending.temp_paths);
    }

    fn write_response_now(&mut self, id: ConnId, response: Response) {
        let Some(conn) = self.pool.get(id) else {
            log::debug!("dropping response for stale connection {id:?}");
            return;
        };
        let mut guard = match conn.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if !guard.is_valid() {
            log::debug!("dropping response for already-closed connection {id:?}");
            return;
        }

        let version = Version::H1_1;
        let keepalive_requested = guard.is_keepalive();
        let decision = if keepalive_requested
            && self.config.keep_alive_enable()
            && guard.request_count() < self.config.keep_alive_max_requests()
        {
            KeepAliveDecision::Reuse
        } else {
            KeepAliveDecision::Close
        };

        let status = response.status();
        let mut response = response;
        if decision == KeepAliveDecision::Reuse {
            let remaining = self.config.keep_alive_max_requests() - guard.request_count();
            response = response.header(
                "Keep-Alive",
                format!(
                    "timeout={}, max={}",
                    self.config.keep_alive_timeout().as_secs(),
                    remaining
                ),
            );
            response = response.header("Connection", "keep-alive");
        } else {
            response = response.header("Connection", "close");
        }

        self.metrics.record_request(status.code(), Duration::ZERO);
        guard.set_state(ConnState::WritingResponse);

        let write_result = {
            let mut write_chunk = |chunk: &[u8]| -> io::Result<()> { guard.write(chunk).map(|_| ()) };
            response.write_to(version, &mut write_chunk)
        };
        if let Err(err) = write_result {
            log::debug!("write failed for {id:?}: {err}");
            guard.close();
            self.metrics.record_connection_closed();
            return;
        }

        match decision {
            KeepAliveDecision::Close => {
                guard.close();
                self.metrics.record_connection_closed();
            }
            KeepAliveDecision::Reuse => {
                guard.increment_request_count();
                guard.set_state(ConnState::IdleKeepalive);
            }
        }
    }

    /// Attaches a WebSocket endpoint; its path comes from
    /// [`WebSocketServer::path`]. Replaces any previously attached
    /// endpoint (§4.5: one WebSocket path per server instance).
    pub fn attach_websocket(&mut self, ws: WebSocketServer) {
        self.websocket = Some(ws);
    }

    /// Queues a WebSocket message back to `id`, flushed on the next tick.
    /// The usual way a host reacts to an `on_message` hook (§4.5's "host
    /// echoes back" pattern): the hook records what arrived, and the
    /// host's own loop calls this once it has decided on a reply. A no-op
    /// if no WebSocket endpoint is attached.
    pub fn websocket_send(&self, id: ConnId, payload: impl Into<Vec<u8>>) {
        if let Some(ws) = &self.websocket {
            ws.send(id, payload);
        }
    }

    /// Attaches the static file handler rooted at `public_path`,
    /// building the LRU cache from the configuration if enabled.
    /// Returns an error if `public_path` does not exist.
    pub fn attach_static(&mut self, public_path: impl Into<String>) -> Result<(), ServerError> {
        let public_path = public_path.into();
        let meta = std::fs::metadata(&public_path).map_err(|err| ServerError::InvalidPath {
            path: public_path.clone(),
            reason: err.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(ServerError::InvalidPath {
                path: public_path,
                reason: "not a directory".into(),
            });
        }

        let cache = self.config.static_cache_enable().then(|| {
            StaticCache::new(
                self.config.static_cache_size(),
                self.config.static_cache_max_entries(),
                self.config.cache_eligible_max_bytes(),
            )
        });
        self.public_path = Some(public_path.clone());
        self.static_handler = Some(StaticHandler::new(
            public_path,
            cache,
            self.config.cache_eligible_max_bytes(),
        ));
        Ok(())
    }

    /// A point-in-time snapshot of server metrics.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.pool.len())
    }

    /// Tags this instance with a worker identity, surfaced in logging
    /// once a worker-pool deployment assigns one (§4.7).
    pub fn set_worker_id(&mut self, id: u32) {
        self.worker_id = Some(id);
    }

    /// Registers a cooperative task to be resumed once per tick, ahead
    /// of this server's own accept/read pass (§5, §9). Used by the
    /// event-driven worker-pool mode to drive its FD-receiving task.
    pub fn register_task(&mut self, task: Box<dyn Task>) {
        self.tasks.register(task);
    }

    /// Adopts an externally accepted connection's raw file descriptor
    /// (handed over via the worker-pool's FD control channel, §4.8),
    /// inserting it into the pool as a plain (non-TLS) connection.
    #[cfg(unix)]
    pub fn add_external_connection(
        &mut self,
        fd: std::os::fd::OwnedFd,
        remote_addr: SocketAddr,
    ) -> bool {
        use std::os::fd::{FromRawFd, IntoRawFd};

        let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd.into_raw_fd()) };
        if let Err(err) = std_stream.set_nonblocking(true) {
            log::error!("failed to set externally-received fd non-blocking: {err}");
            return false;
        }
        let stream = MTcpStream::from_std(std_stream);

        let token = self.next_token();
        let conn = Connection::plain(stream, remote_addr, token, self.config.buffer_size());
        match self.pool.insert(conn) {
            Some(_) => {
                self.metrics.record_connection_opened();
                true
            }
            None => {
                log::warn!("dropping externally-received connection: pool is full");
                false
            }
        }
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn accept_connections(&mut self) {
        // Taken out of `self` for the duration of the loop so that the
        // listener's borrow doesn't overlap with the `&mut self` calls
        // (`next_token`, `pool.insert`) below.
        let Some(listener) = self.listener.take() else { return };
        let mut accepted = 0;
        while accepted < self.config.max_accepts_per_cycle() {
            let (stream, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("accept failed: {err}");
                    break;
                }
            };
            accepted += 1;

            if let Err(err) = stream.set_nodelay(true) {
                log::debug!("failed to set TCP_NODELAY: {err}");
            }

            let token = self.next_token();
            let conn = if let Some(tls_config) = &self.tls_config {
                match rustls::ServerConnection::new(tls_config.clone()) {
                    Ok(tls) => Connection::tls(stream, tls, addr, token, self.config.buffer_size()),
                    Err(err) => {
                        log::warn!("failed to start TLS session for {addr}: {err}");
                        continue;
                    }
                }
            } else {
                Connection::plain(stream, addr, token, self.config.buffer_size())
            };

            if self.pool.insert(conn).is_some() {
                self.metrics.record_connection_opened();
            } else {
                log::warn!("rejecting connection from {addr}: pool is full");
            }
        }
        self.listener = Some(listener);
    }

    fn read_connections(&mut self) {
        let indices: Vec<usize> = self.pool.iter().map(|(i, _)| i).collect();
        for index in indices {
            let Some(conn) = self.pool.get_by_index(index) else { continue };
            let Ok(mut guard) = conn.lock() else { continue };
            if !guard.is_valid() {
                continue;
            }
            if matches!(guard.state(), ConnState::AwaitingResponse | ConnState::WritingResponse) {
                continue;
            }
            match guard.fill() {
                Ok(0) => {
                    guard.close();
                }
                Ok(_) => {
                    guard.start_request_timer();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    log::debug!("read error on connection {index}: {err}");
                    guard.close();
                }
            }
            // A pipelined request can already be sitting in the buffer
            // from `finish_request()`'s leftover bytes even when this
            // tick's `fill()` brought in nothing new (`WouldBlock`).
            if guard.is_valid()
                && matches!(guard.state(), ConnState::IdleKeepalive)
                && !guard.buffer().is_empty()
            {
                guard.set_state(ConnState::ReadingHeaders);
            }
        }
    }

    fn process_http_requests(&mut self) {
        let indices: Vec<usize> = self.pool.iter().map(|(i, _)| i).collect();
        for index in indices {
            loop {
                let Some(id) = self.pool.id_for_index(index) else { break };
                if self.ws_upgraded.contains(&id) {
                    self.process_websocket_frames(id);
                    break;
                }
                match self.process_one_request(id) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(()) => break,
                }
            }
        }
    }

    /// Attempts to frame and dispatch exactly one request from a
    /// connection's buffer. Returns `Ok(true)` if a request was
    /// dispatched and another pipelined request might already be
    /// buffered (the caller should loop), `Ok(false)` if there is not
    /// enough data yet, and `Err(())` if the connection was closed.
    fn process_one_request(&mut self, id: ConnId) -> Result<bool, ()> {
        let Some(conn) = self.pool.get(id) else { return Err(()) };
        let Ok(mut guard) = conn.lock() else { return Err(()) };
        if !guard.is_valid() || !matches!(guard.state(), ConnState::ReadingHeaders | ConnState::ReadingBody) {
            return Ok(false);
        }

        if guard.is_request_timed_out(self.config.request_timeout()) {
            drop(guard);
            self.write_response_now(id, plain_text_error(Status::RequestTimeout));
            return Err(());
        }

        let buffer = guard.buffer();
        if !h1::has_complete_headers(buffer) {
            return Ok(false);
        }

        let (header_block, _) = h1::split_headers_and_body(buffer).expect("checked complete above");
        let header_block_end = header_block.len();

        // Everything borrowed from `header_block` (and transitively from
        // `guard`'s read buffer) must be converted to owned data before we
        // touch `guard` mutably below — `parsed` cannot outlive this block.
        let (is_chunked, content_length, method, version, target, keep_alive, owned_headers) =
            match H1Request::parse(header_block) {
                Ok(parsed) => (
                    parsed.headers.is_chunked(),
                    parsed.headers.content_length(),
                    parsed.method,
                    parsed.version,
                    parsed.target.to_string(),
                    resolve_keep_alive(&parsed.headers, parsed.version),
                    OwnedHeaders::from_wire(&parsed.headers),
                ),
                Err(err) => {
                    log::debug!("malformed request from {}: {err}", guard.remote_addr());
                    drop(guard);
                    self.write_response_now(id, plain_text_error(Status::BadRequest));
                    return Err(());
                }
            };

        if is_chunked {
            drop(guard);
            self.write_response_now(id, plain_text_error(Status::NotImplemented));
            return Err(());
        }

        if content_length > self.config.max_request_size() {
            drop(guard);
            self.write_response_now(id, plain_text_error(Status::ContentTooLarge));
            return Err(());
        }

        guard.set_cached_headers(CachedHeaders { header_block_end, content_length });
        guard.set_state(ConnState::ReadingBody);

        let total_needed = header_block_end + content_length;
        if guard.buffer().len() < total_needed {
            return Ok(false);
        }

        if let Some(limiter) = &mut self.rate_limiter {
            let ip = guard.remote_addr().ip();
            if !limiter.check(ip) {
                let retry_after = limiter.get_reset_time(ip).max(1);
                drop(guard);
                let response = plain_text_error(Status::TooManyRequests)
                    .header("Retry-After", retry_after.to_string());
                self.write_response_now(id, response);
                return Err(());
            }
        }

        let body = guard.buffer()[header_block_end..total_needed].to_vec();
        let remote_addr = guard.remote_addr();
        guard.set_keepalive(keep_alive);

        if method == Method::Get || method == Method::Head {
            if let Some(ws) = &self.websocket {
                if ws.matches(&target) {
                    match ws.handle_handshake(id, &owned_headers) {
                        Ok(response) => {
                            guard.finish_request(total_needed);
                            let wire = match response.into_wire(version) {
                                Ok(w) => w,
                                Err(err) => {
                                    log::error!("failed to materialize websocket upgrade response: {err}");
                                    guard.close();
                                    drop(guard);
                                    return Err(());
                                }
                            };
                            let bytes = wire.serialize();
                            if let Err(err) = guard.write(&bytes) {
                                log::debug!("write failed during websocket upgrade for {id:?}: {err}");
                                guard.close();
                                drop(guard);
                                return Err(());
                            }
                            guard.set_state(ConnState::ReadingHeaders);
                            drop(guard);
                            self.ws_upgraded.insert(id);
                            return Ok(false);
                        }
                        Err(err) => {
                            log::debug!("websocket handshake rejected: {err}");
                            drop(guard);
                            self.write_response_now(id, plain_text_error(Status::BadRequest));
                            return Err(());
                        }
                    }
                }
            }
        }

        guard.finish_request(total_needed);
        guard.set_state(ConnState::InQueue);
        drop(guard);

        let (parsed_body, uploaded_files) = self.build_body(&owned_headers, &body);
        let request = Request::new(
            method,
            target,
            version,
            owned_headers,
            parsed_body,
            uploaded_files,
            ServerParams { remote_addr },
        );

        self.dispatch(id, request);
        Ok(true)
    }

    /// Routes a framed request either into the public request queue (for
    /// the host to pop via `get_request`) or, if a static file handler
    /// is attached and no application route intercepts it first, serves
    /// it directly and writes the response immediately.
    fn dispatch(&mut self, id: ConnId, request: Request) {
        if let Some(handler) = &self.static_handler {
            if matches!(request.method(), Method::Get | Method::Head) {
                let response = handler.handle(request.method(), request.path(), request.headers(), &mut self.metrics);
                if response.status() != Status::NotFound {
                    self.write_response_now(id, response);
                    return;
                }
            }
        }
        let temp_paths = request
            .uploaded_files()
            .values()
            .map(|f| f.temp_path().to_path_buf())
            .collect();
        self.request_queue.push_back(QueuedRequest { id, request, temp_paths });
    }

    fn build_body(&self, headers: &OwnedHeaders, body: &[u8]) -> (ParsedBody, std::collections::HashMap<String, UploadedFile>) {
        let content_type = headers.get("content-type");
        let parsed = match h1::body::parse_body(content_type, body) {
            Ok(p) => p,
            Err(err) => {
                log::debug!("failed to parse request body: {err}");
                return (ParsedBody::default(), std::collections::HashMap::new());
            }
        };

        let mut uploaded_files = std::collections::HashMap::new();
        for (name, part) in parsed.files {
            let status = match self.tempfiles.create(part.data) {
                Ok(path) => (path, UploadStatus::Ok),
                Err(err) => (std::path::PathBuf::new(), UploadStatus::Error(err.to_string())),
            };
            let (temp_path, status) = status;
            uploaded_files.insert(
                name,
                UploadedFile::new(
                    part.filename.clone().unwrap_or_default(),
                    part.content_type.clone(),
                    temp_path,
                    part.data.len() as u64,
                    status,
                ),
            );
        }

        (ParsedBody { form: parsed.form, json: parsed.json }, uploaded_files)
    }

    fn process_websocket_frames(&mut self, id: ConnId) {
        let Some(ws) = &self.websocket else { return };
        loop {
            let Some(conn) = self.pool.get(id) else { return };
            let Ok(mut guard) = conn.lock() else { return };
            if !guard.is_valid() {
                drop(guard);
                ws.forget(id);
                self.ws_upgraded.remove(&id);
                return;
            }

            let outcome = {
                let buffer = guard.buffer();
                if buffer.is_empty() {
                    return;
                }
                Frame::decode_masked(buffer)
            };

            match outcome {
                Ok(h1::ParseOutcome::Complete((frame, consumed))) => {
                    guard.consume(consumed);
                    drop(guard);
                    ws.handle_frame(id, frame);
                }
                Ok(h1::ParseOutcome::Partial) => return,
                Err(err) => {
                    log::debug!("malformed websocket frame from {id:?}: {err}");
                    guard.close();
                    drop(guard);
                    ws.handle_error(id, 1002, "protocol error");
                    self.ws_upgraded.remove(&id);
                    return;
                }
            }
        }
    }

    fn run_ping_scheduler(&mut self) {
        let Some(ws) = &self.websocket else { return };
        for id in ws.due_for_ping() {
            ws.send_ping(id);
        }
        for id in ws.timed_out() {
            ws.close_timed_out(id);
            if let Some(conn) = self.pool.get(id) {
                if let Ok(mut g) = conn.lock() {
                    g.set_keepalive(false);
                }
            }
        }
    }

    fn flush_all_websocket_outbound(&mut self) {
        let Some(ws) = &self.websocket else { return };
        let ids: Vec<ConnId> = self.ws_upgraded.iter().copied().collect();
        for id in ids {
            let frames = ws.drain_outbound(id);
            if frames.is_empty() {
                continue;
            }
            let Some(conn) = self.pool.get(id) else { continue };
            let Ok(mut guard) = conn.lock() else { continue };
            let mut closing = false;
            for frame in &frames {
                let bytes = frame.encode(None);
                if let Err(err) = guard.write(&bytes) {
                    log::debug!("websocket write failed for {id:?}: {err}");
                    guard.close();
                    break;
                }
                if frame.opcode == loopserve_parser::ws::OpCode::Close {
                    closing = true;
                }
            }
            if closing {
                guard.close();
            }
        }
    }

    fn reap_timed_out(&mut self) {
        let removed = self.pool.remove_timed_out(self.config.connection_timeout());
        if removed > 0 {
            self.metrics.record_timed_out(removed);
        }
        let closed: Vec<ConnId> = self
            .pool
            .iter()
            .filter_map(|(i, conn)| {
                let guard = conn.lock().ok()?;
                if !guard.is_valid() {
                    self.pool.id_for_index(i)
                } else {
                    None
                }
            })
            .collect();
        for id in closed {
            self.ws_upgraded.remove(&id);
            if let Some(ws) = &self.websocket {
                if self.pool.get(id).is_some() {
                    ws.forget(id);
                }
            }
        }
        let dead_indices: Vec<usize> = self
            .pool
            .iter()
            .filter_map(|(i, conn)| conn.lock().ok().filter(|g| !g.is_valid()).map(|_| i))
            .collect();
        for index in dead_indices {
            self.pool.remove_by_index(index);
            self.metrics.record_connection_closed();
        }
    }
}

/// Builds a plain-text failure response carrying just the status's
/// reason phrase as its body, for the framing-level rejections that
/// happen before a request ever reaches the queue.
fn plain_text_error(status: Status) -> Response {
    Response::from_wire(h1::response::Response::plain_error(Version::H1_1, status))
}

/// Decides whether a connection should be reused after the current
/// response, per §4.3.2: HTTP/1.1 defaults to keep-alive unless
/// `Connection: close` is present; HTTP/1.0 defaults to close unless
/// `Connection: keep-alive` is explicitly present.
fn resolve_keep_alive(headers: &WireHeaders<'_>, version: Version) -> bool {
    let connection = headers.get_str("connection").unwrap_or("");
    let tokens: Vec<&str> = connection.split(',').map(str::trim).collect();
    let has_close = tokens.iter().any(|t| t.eq_ignore_ascii_case("close"));
    let has_keepalive = tokens.iter().any(|t| t.eq_ignore_ascii_case("keep-alive"));

    match version {
        Version::H1_1 => !has_close,
        Version::H1_0 => has_keepalive,
    }
}

fn load_tls_config(config: &Config) -> Result<rustls::ServerConfig, ServerError> {
    let cert_path = config.tls_cert().ok_or_else(|| ServerError::Tls("missing tls_cert path".into()))?;
    let key_path = config.tls_key().ok_or_else(|| ServerError::Tls("missing tls_key path".into()))?;

    let cert_file = std::fs::File::open(cert_path).map_err(|e| ServerError::Tls(format!("opening {cert_path}: {e}")))?;
    let mut cert_reader = io::BufReader::new(cert_file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| ServerError::Tls(format!("parsing {cert_path}: {e}")))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!("{cert_path} contains no certificates")));
    }

    let key_file = std::fs::File::open(key_path).map_err(|e| ServerError::Tls(format!("opening {key_path}: {e}")))?;
    let mut key_reader = io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ServerError::Tls(format!("parsing {key_path}: {e}")))?
        .ok_or_else(|| ServerError::Tls(format!("{key_path} contains no private key")))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(format!("building TLS config: {e}")))
}

impl Response {
    /// Wraps a wire-level response (used internally for handshake/error
    /// responses built directly from [`loopserve_parser::h1::response`])
    /// back into the host-facing [`Response`] type.
    fn from_wire(wire: h1::response::Response) -> Self {
        Response::new(wire.status()).with_body(wire.body().to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpStream as StdTcpStream;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn keep_alive_resolves_per_version_defaults() {
        let headers = WireHeaders::parse(b"\r\n").unwrap();
        assert!(resolve_keep_alive(&headers, Version::H1_1));
        assert!(!resolve_keep_alive(&headers, Version::H1_0));

        let headers = WireHeaders::parse(b"Connection: close\r\n\r\n").unwrap();
        assert!(!resolve_keep_alive(&headers, Version::H1_1));

        let headers = WireHeaders::parse(b"Connection: keep-alive\r\n\r\n").unwrap();
        assert!(resolve_keep_alive(&headers, Version::H1_0));
    }

    #[test]
    fn start_binds_and_has_request_reports_false_when_idle() {
        let port = free_port();
        let config = Config::builder().host("127.0.0.1").port(port).build();
        let mut server = Server::new(config);
        assert!(server.start());
        assert!(!server.has_request());
        server.stop();
    }

    #[test]
    fn serves_a_simple_get_request_end_to_end() {
        let port = free_port();
        let config = Config::builder().host("127.0.0.1").port(port).build();
        let mut server = Server::new(config);
        assert!(server.start());

        let mut client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .unwrap();

        let mut request = None;
        for _ in 0..200 {
            if server.has_request() {
                request = server.get_request();
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let request = request.expect("request should have been framed");
        assert_eq!(request.path(), "/hello");

        server.respond(Response::new(Status::Ok).with_body(b"hi".to_vec()));

        let mut buf = Vec::new();
        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let _ = client.read_to_end(&mut buf);
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn rejects_chunked_transfer_encoding() {
        let port = free_port();
        let config = Config::builder().host("127.0.0.1").port(port).build();
        let mut server = Server::new(config);
        assert!(server.start());

        let mut client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .write_all(b"POST /x HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();

        for _ in 0..200 {
            server.has_request();
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut buf = Vec::new();
        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let _ = client.read_to_end(&mut buf);
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("HTTP/1.1 501"));
    }
}

//! Server-side WebSocket support (§4.5): the opening handshake, frame
//! exchange, rooms, and event hooks, sitting on top of the wire-level
//! codec in [`loopserve_parser::ws`].

pub mod handshake;
pub mod registry;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use loopserve_parser::ws::{Frame, OpCode};

use crate::connection::ConnId;
use crate::request::OwnedHeaders;
use crate::response::Response;

pub use handshake::HandshakeError;
pub use registry::{Reassembled, WsRegistry, WsState};

type ConnectHook = Box<dyn Fn(ConnId) + Send + Sync>;
type MessageHook = Box<dyn Fn(ConnId, OpCode, &[u8]) + Send + Sync>;
type CloseHook = Box<dyn Fn(ConnId, Option<u16>) + Send + Sync>;
type ErrorHook = Box<dyn Fn(ConnId, &str) + Send + Sync>;

/// Event callbacks fired as WebSocket connections progress. Each list is
/// invoked in registration order; a callback that panics is caught and
/// logged so later callbacks still run (§4.5.4).
#[derive(Default)]
pub struct WsHooks {
    on_connect: Vec<ConnectHook>,
    on_message: Vec<MessageHook>,
    on_close: Vec<CloseHook>,
    on_error: Vec<ErrorHook>,
}

impl std::fmt::Debug for WsHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsHooks")
            .field("on_connect", &self.on_connect.len())
            .field("on_message", &self.on_message.len())
            .field("on_close", &self.on_close.len())
            .field("on_error", &self.on_error.len())
            .finish()
    }
}

impl WsHooks {
    fn fire_connect(&self, id: ConnId) {
        for hook in &self.on_connect {
            if catch_unwind(AssertUnwindSafe(|| hook(id))).is_err() {
                log::error!("websocket on_connect hook panicked for {id:?}");
            }
        }
    }

    fn fire_message(&self, id: ConnId, opcode: OpCode, payload: &[u8]) {
        for hook in &self.on_message {
            if catch_unwind(AssertUnwindSafe(|| hook(id, opcode, payload))).is_err() {
                log::error!("websocket on_message hook panicked for {id:?}");
            }
        }
    }

    fn fire_close(&self, id: ConnId, code: Option<u16>) {
        for hook in &self.on_close {
            if catch_unwind(AssertUnwindSafe(|| hook(id, code))).is_err() {
                log::error!("websocket on_close hook panicked for {id:?}");
            }
        }
    }

    fn fire_error(&self, id: ConnId, message: &str) {
        for hook in &self.on_error {
            if catch_unwind(AssertUnwindSafe(|| hook(id, message))).is_err() {
                log::error!("websocket on_error hook panicked for {id:?}");
            }
        }
    }
}

/// A WebSocket endpoint attached to the server via
/// [`crate::server::Server::attach_websocket`]: owns the connection
/// registry, the configured liveness timers, and the event hooks a host
/// registers to react to connect/message/close/error.
pub struct WebSocketServer {
    path: String,
    registry: std::sync::Mutex<WsRegistry>,
    hooks: WsHooks,
    allowed_origins: Vec<String>,
    sub_protocols: Vec<String>,
    ping_interval: Duration,
    pong_timeout: Duration,
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("path", &self.path)
            .field("ping_interval", &self.ping_interval)
            .field("pong_timeout", &self.pong_timeout)
            .finish()
    }
}

impl WebSocketServer {
    /// Creates a WebSocket endpoint served at `path`, with default
    /// liveness timers (ping every 30s, 10s to respond with a pong).
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            registry: std::sync::Mutex::new(WsRegistry::new()),
            hooks: WsHooks::default(),
            allowed_origins: Vec::new(),
            sub_protocols: Vec::new(),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }

    /// Restricts handshakes to the given `Origin` values (`*` allows any).
    pub fn allow_origins(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Declares the sub-protocols this endpoint is willing to negotiate,
    /// in preference order.
    pub fn sub_protocols(mut self, protocols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sub_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Configures the ping interval and pong timeout.
    pub fn ping_policy(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    /// Registers a callback fired once a connection completes its
    /// handshake.
    pub fn on_connect(mut self, hook: impl Fn(ConnId) + Send + Sync + 'static) -> Self {
        self.hooks.on_connect.push(Box::new(hook));
        self
    }

    /// Registers a callback fired for every complete inbound message.
    pub fn on_message(mut self, hook: impl Fn(ConnId, OpCode, &[u8]) + Send + Sync + 'static) -> Self {
        self.hooks.on_message.push(Box::new(hook));
        self
    }

    /// Registers a callback fired when a connection closes, with the
    /// close code if one was sent.
    pub fn on_close(mut self, hook: impl Fn(ConnId, Option<u16>) + Send + Sync + 'static) -> Self {
        self.hooks.on_close.push(Box::new(hook));
        self
    }

    /// Registers a callback fired on protocol errors (malformed frames,
    /// handshake failures past the point a plain HTTP error can be
    /// returned).
    pub fn on_error(mut self, hook: impl Fn(ConnId, &str) + Send + Sync + 'static) -> Self {
        self.hooks.on_error.push(Box::new(hook));
        self
    }

    /// The path this endpoint is attached at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether `request_path` matches this endpoint.
    pub fn matches(&self, request_path: &str) -> bool {
        self.path == request_path
    }

    /// Validates and answers the opening handshake, registering the
    /// connection on success.
    pub fn handle_handshake(
        &self,
        id: ConnId,
        headers: &OwnedHeaders,
    ) -> Result<Response, HandshakeError> {
        let key = handshake::validate_request(headers, &self.allowed_origins)?;

        let negotiated = headers.get("sec-websocket-protocol").and_then(|requested| {
            requested
                .split(',')
                .map(str::trim)
                .find(|p| self.sub_protocols.iter().any(|sp| sp == p))
        });

        self.registry.lock().unwrap().register(id);
        self.hooks.fire_connect(id);
        Ok(handshake::build_upgrade_response(&key, negotiated))
    }

    /// Feeds one decoded frame for `id` through reassembly, firing
    /// `on_message` for complete messages and handling control frames
    /// (ping replies with pong, pong updates liveness, close begins the
    /// closing handshake) per RFC 6455 §5.5.
    pub fn handle_frame(&self, id: ConnId, frame: Frame) {
        let mut registry = self.registry.lock().unwrap();
        match registry.reassemble(id, frame) {
            Reassembled::Pending => {}
            Reassembled::Message(opcode, payload) => {
                drop(registry);
                self.hooks.fire_message(id, opcode, &payload);
            }
            Reassembled::Control(frame) => match frame.opcode {
                OpCode::Ping => registry.send_to(id, Frame::pong(frame.payload)),
                OpCode::Pong => registry.record_pong(id),
                OpCode::Close => {
                    let code = close_code(&frame.payload);
                    registry.mark_closing(id);
                    registry.send_to(id, Frame::close(code, ""));
                    drop(registry);
                    self.hooks.fire_close(id, code);
                }
                _ => unreachable!("is_control() only matches Close/Ping/Pong"),
            },
            Reassembled::ProtocolError => {
                registry.mark_closing(id);
                registry.send_to(id, Frame::close(Some(1002), "protocol error"));
                drop(registry);
                self.hooks.fire_error(id, "fragmented message interrupted by an unexpected frame");
            }
        }
    }

    /// Reports a protocol-level error for `id` (e.g. an undecodable
    /// frame), firing `on_error` and queuing a close frame with the given
    /// close code.
    pub fn handle_error(&self, id: ConnId, code: u16, message: &str) {
        self.hooks.fire_error(id, message);
        self.registry
            .lock()
            .unwrap()
            .send_to(id, Frame::close(Some(code), message));
    }

    /// Drops a connection from the registry without a close handshake
    /// (the underlying socket already went away).
    pub fn forget(&self, id: ConnId) {
        self.registry.lock().unwrap().unregister(id);
        self.hooks.fire_close(id, None);
    }

    /// Adds `id` to `room`.
    pub fn join_room(&self, id: ConnId, room: &str) {
        self.registry.lock().unwrap().join_room(id, room);
    }

    /// Removes `id` from `room`.
    pub fn leave_room(&self, id: ConnId, room: &str) {
        self.registry.lock().unwrap().leave_room(id, room);
    }

    /// Queues a text message for delivery to a single connection, for a
    /// host to call from an `on_message` hook (or its own tick loop) to
    /// echo or reply to one sender.
    pub fn send(&self, id: ConnId, payload: impl Into<Vec<u8>>) {
        self.registry.lock().unwrap().send_to(id, Frame::text(payload));
    }

    /// Queues a text message for delivery to every open connection except
    /// `exclude`, if given — pass the sender's `ConnId` from `on_message`
    /// to get the usual "echo to everyone else" behavior.
    pub fn broadcast(&self, payload: impl Into<Vec<u8>>, exclude: Option<ConnId>) {
        self.registry.lock().unwrap().broadcast(Frame::text(payload), exclude);
    }

    /// Queues a text message for delivery to every member of `room`
    /// except `exclude`, if given.
    pub fn broadcast_to_room(&self, room: &str, payload: impl Into<Vec<u8>>, exclude: Option<ConnId>) {
        self.registry
            .lock()
            .unwrap()
            .broadcast_to_room(room, Frame::text(payload), exclude);
    }

    /// Drains frames queued for `id`, for the server loop to write out.
    pub fn drain_outbound(&self, id: ConnId) -> Vec<Frame> {
        self.registry.lock().unwrap().drain_outbound(id)
    }

    /// Connections due for a keepalive ping; the caller sends a ping
    /// frame to each and calls [`WebSocketServer::mark_ping_sent`].
    pub fn due_for_ping(&self) -> Vec<ConnId> {
        self.registry.lock().unwrap().due_for_ping(self.ping_interval)
    }

    /// Records that a ping was just sent to `id`.
    pub fn mark_ping_sent(&self, id: ConnId) {
        self.registry.lock().unwrap().mark_ping_sent(id);
    }

    /// Queues a ping frame for `id` and records it as sent, per the ping
    /// scheduler in §4.5.3. Combines what a caller would otherwise do by
    /// hand with [`WebSocketServer::due_for_ping`] and
    /// [`WebSocketServer::mark_ping_sent`].
    pub fn send_ping(&self, id: ConnId) {
        let mut registry = self.registry.lock().unwrap();
        registry.send_to(id, Frame::ping(Vec::new()));
        registry.mark_ping_sent(id);
    }

    /// Drops `id` from the registry, per the pong-timeout close path in
    /// §4.5.3 (close with code 1008 on a missed pong deadline).
    pub fn close_timed_out(&self, id: ConnId) {
        let mut registry = self.registry.lock().unwrap();
        registry.send_to(id, Frame::close(Some(1008), "ping timeout"));
        registry.unregister(id);
    }

    /// Connections that missed their pong deadline; the caller should
    /// close these with code 1008 (Policy Violation).
    pub fn timed_out(&self) -> Vec<ConnId> {
        self.registry.lock().unwrap().timed_out(self.pong_timeout)
    }

    /// Number of connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().unwrap().len()
    }
}

/// Extracts the close code from a close frame's payload, if present
/// (RFC 6455 §5.5.1: first two bytes, big-endian, when the payload is
/// non-empty).
fn close_code(payload: &[u8]) -> Option<u16> {
    if payload.len() >= 2 {
        Some(u16::from_be_bytes([payload[0], payload[1]]))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn id(n: usize) -> ConnId {
        crate::connection::ConnId { index: n, generation: 0 }
    }

    fn parse_headers(block: &str) -> OwnedHeaders {
        let wire = loopserve_parser::h1::headers::Headers::parse(block.as_bytes()).unwrap();
        OwnedHeaders::from_wire(&wire)
    }

    fn handshake_headers(key: &str) -> OwnedHeaders {
        parse_headers(&format!(
            "Host: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        ))
    }

    #[test]
    fn successful_handshake_registers_and_fires_connect() {
        let connected = Arc::new(AtomicUsize::new(0));
        let c2 = connected.clone();
        let ws = WebSocketServer::new("/ws").on_connect(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        let headers = handshake_headers("dGhlIHNhbXBsZSBub25jZQ==");
        let resp = ws.handle_handshake(id(1), &headers).unwrap();
        assert_eq!(resp.status(), loopserve_parser::Status::SwitchingProtocols);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(ws.connection_count(), 1);
    }

    #[test]
    fn close_frame_echoes_and_fires_on_close() {
        let closed_code = Arc::new(std::sync::Mutex::new(None));
        let c2 = closed_code.clone();
        let ws = WebSocketServer::new("/ws").on_close(move |_, code| {
            *c2.lock().unwrap() = Some(code);
        });
        ws.registry.lock().unwrap().register(id(1));

        ws.handle_frame(id(1), Frame::close(Some(1000), ""));
        assert_eq!(*closed_code.lock().unwrap(), Some(Some(1000)));
        let queued = ws.drain_outbound(id(1));
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].opcode, OpCode::Close);
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let ws = WebSocketServer::new("/ws");
        ws.registry.lock().unwrap().register(id(1));
        ws.handle_frame(id(1), Frame::ping(b"x".to_vec()));
        let queued = ws.drain_outbound(id(1));
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].opcode, OpCode::Pong);
    }

    #[test]
    fn interrupted_fragment_closes_with_protocol_error() {
        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let e2 = errors.clone();
        let ws = WebSocketServer::new("/ws").on_error(move |_, msg| {
            e2.lock().unwrap().push(msg.to_string());
        });
        ws.registry.lock().unwrap().register(id(1));

        ws.handle_frame(id(1), Frame { fin: false, opcode: OpCode::Text, payload: b"hel".to_vec() });
        ws.handle_frame(id(1), Frame { fin: false, opcode: OpCode::Binary, payload: b"oops".to_vec() });

        assert_eq!(errors.lock().unwrap().len(), 1);
        let queued = ws.drain_outbound(id(1));
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].opcode, OpCode::Close);
    }

    #[test]
    fn broadcast_excludes_the_sender() {
        let ws = WebSocketServer::new("/ws");
        ws.registry.lock().unwrap().register(id(1));
        ws.registry.lock().unwrap().register(id(2));
        ws.broadcast("hi", Some(id(1)));
        assert_eq!(ws.drain_outbound(id(1)).len(), 0);
        assert_eq!(ws.drain_outbound(id(2)).len(), 1);
    }

    #[test]
    fn origin_allow_list_rejects_disallowed_origin() {
        let ws = WebSocketServer::new("/ws").allow_origins(["https://example.com"]);
        let headers = parse_headers(
            "Host: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\nOrigin: https://evil.com\r\n\r\n",
        );
        let result = ws.handle_handshake(id(1), &headers);
        assert_eq!(result.err(), Some(HandshakeError::OriginNotAllowed));
    }
}

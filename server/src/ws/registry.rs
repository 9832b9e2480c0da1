//! Server-side WebSocket connection bookkeeping (§4.5.3): per-connection
//! fragment reassembly, room membership, and the ping/pong liveness
//! sweep.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use loopserve_parser::ws::{Frame, OpCode};

use crate::connection::ConnId;

/// A WebSocket connection's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    /// Open and able to exchange frames.
    Open,
    /// A close frame was sent or received; draining before the
    /// underlying connection is torn down.
    Closing,
}

/// Per-connection WebSocket state tracked by the registry.
#[derive(Debug)]
pub struct WsConnection {
    id: ConnId,
    state: WsState,
    rooms: HashSet<String>,
    fragment_opcode: Option<OpCode>,
    fragment_buffer: Vec<u8>,
    outbound: VecDeque<Frame>,
    last_pong_at: Instant,
    ping_awaiting_pong: bool,
}

impl WsConnection {
    fn new(id: ConnId) -> Self {
        Self {
            id,
            state: WsState::Open,
            rooms: HashSet::new(),
            fragment_opcode: None,
            fragment_buffer: Vec::new(),
            outbound: VecDeque::new(),
            last_pong_at: Instant::now(),
            ping_awaiting_pong: false,
        }
    }

    /// The connection's pool identity.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WsState {
        self.state
    }

    /// Rooms this connection currently belongs to.
    pub fn rooms(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(String::as_str)
    }
}

/// The outcome of feeding one inbound frame through fragment reassembly.
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembled {
    /// The frame was a fragment; no complete message yet.
    Pending,
    /// A complete message (possibly the reassembly of several fragments).
    Message(OpCode, Vec<u8>),
    /// A control frame, passed through unbuffered (control frames are
    /// never fragmented per RFC 6455 §5.4).
    Control(Frame),
    /// A new data frame arrived with a non-`Continuation` opcode while a
    /// fragmented message was still open — a protocol violation per RFC
    /// 6455 §5.4 ("An endpoint MUST NOT send a Continuation frame
    /// without having sent a non-final frame... and vice versa"). The
    /// caller should close the connection with code 1002.
    ProtocolError,
}

/// Tracks every live WebSocket connection: its room memberships,
/// in-progress fragment reassembly, queued outbound frames, and
/// ping/pong liveness.
#[derive(Debug, Default)]
pub struct WsRegistry {
    connections: HashMap<ConnId, WsConnection>,
    rooms: HashMap<String, HashSet<ConnId>>,
}

impl WsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly upgraded connection.
    pub fn register(&mut self, id: ConnId) {
        self.connections.insert(id, WsConnection::new(id));
    }

    /// Removes a connection and its room memberships.
    pub fn unregister(&mut self, id: ConnId) {
        if let Some(conn) = self.connections.remove(&id) {
            for room in conn.rooms {
                if let Some(members) = self.rooms.get_mut(&room) {
                    members.remove(&id);
                }
            }
        }
    }

    /// Whether `id` is a tracked WebSocket connection.
    pub fn contains(&self, id: ConnId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Feeds one decoded inbound frame through per-connection fragment
    /// reassembly (RFC 6455 §5.4). Control frames pass straight through;
    /// data frames accumulate until a `fin` frame completes the message.
    pub fn reassemble(&mut self, id: ConnId, frame: Frame) -> Reassembled {
        let Some(conn) = self.connections.get_mut(&id) else {
            return Reassembled::Pending;
        };

        if frame.opcode.is_control() {
            return Reassembled::Control(frame);
        }

        if frame.opcode != OpCode::Continuation {
            if conn.fragment_opcode.is_some() {
                return Reassembled::ProtocolError;
            }
            conn.fragment_opcode = Some(frame.opcode);
        } else if conn.fragment_opcode.is_none() {
            return Reassembled::ProtocolError;
        }
        conn.fragment_buffer.extend_from_slice(&frame.payload);

        if frame.fin {
            let opcode = conn.fragment_opcode.take().unwrap_or(OpCode::Binary);
            let payload = std::mem::take(&mut conn.fragment_buffer);
            Reassembled::Message(opcode, payload)
        } else {
            Reassembled::Pending
        }
    }

    /// Marks `id` as closing (a close frame was sent or received).
    pub fn mark_closing(&mut self, id: ConnId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.state = WsState::Closing;
        }
    }

    /// Adds `id` to `room`.
    pub fn join_room(&mut self, id: ConnId, room: &str) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.rooms.insert(room.to_string());
            self.rooms.entry(room.to_string()).or_default().insert(id);
        }
    }

    /// Removes `id` from `room`.
    pub fn leave_room(&mut self, id: ConnId, room: &str) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.rooms.remove(room);
        }
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
        }
    }

    /// Queues `frame` for delivery to every registered connection except
    /// `exclude`, if given — the usual way a host echoes a message to
    /// everyone but its sender.
    pub fn broadcast(&mut self, frame: Frame, exclude: Option<ConnId>) {
        for conn in self.connections.values_mut() {
            if Some(conn.id) == exclude {
                continue;
            }
            conn.outbound.push_back(frame.clone());
        }
    }

    /// Queues `frame` for delivery to every member of `room` except
    /// `exclude`, if given.
    pub fn broadcast_to_room(&mut self, room: &str, frame: Frame, exclude: Option<ConnId>) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for id in members {
            if Some(*id) == exclude {
                continue;
            }
            if let Some(conn) = self.connections.get_mut(id) {
                conn.outbound.push_back(frame.clone());
            }
        }
    }

    /// Queues `frame` for delivery to exactly one connection.
    pub fn send_to(&mut self, id: ConnId, frame: Frame) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.outbound.push_back(frame);
        }
    }

    /// Drains and returns every frame queued for `id`, in order, for the
    /// server loop to write to the underlying connection.
    pub fn drain_outbound(&mut self, id: ConnId) -> Vec<Frame> {
        self.connections
            .get_mut(&id)
            .map(|conn| conn.outbound.drain(..).collect())
            .unwrap_or_default()
    }

    /// Resets `id`'s pong liveness clock (a pong frame was received).
    pub fn record_pong(&mut self, id: ConnId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.last_pong_at = Instant::now();
            conn.ping_awaiting_pong = false;
        }
    }

    /// Connections whose ping interval has elapsed and that have not yet
    /// had a ping sent this cycle; the caller should send a ping and then
    /// record it is outstanding.
    pub fn due_for_ping(&self, interval: std::time::Duration) -> Vec<ConnId> {
        self.connections
            .values()
            .filter(|c| !c.ping_awaiting_pong && c.last_pong_at.elapsed() >= interval)
            .map(|c| c.id)
            .collect()
    }

    /// Marks that a ping was just sent to `id`, starting its pong-timeout
    /// clock.
    pub fn mark_ping_sent(&mut self, id: ConnId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.ping_awaiting_pong = true;
        }
    }

    /// Connections that missed their pong within `pong_timeout` since the
    /// ping was sent — the caller should close these with code 1008.
    pub fn timed_out(&self, pong_timeout: std::time::Duration) -> Vec<ConnId> {
        self.connections
            .values()
            .filter(|c| c.ping_awaiting_pong && c.last_pong_at.elapsed() >= pong_timeout)
            .map(|c| c.id)
            .collect()
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(n: usize) -> ConnId {
        crate::connection::ConnId { index: n, generation: 0 }
    }

    #[test]
    fn reassembles_a_fragmented_text_message() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));

        let first = Frame { fin: false, opcode: OpCode::Text, payload: b"hel".to_vec() };
        assert_eq!(registry.reassemble(id(1), first), Reassembled::Pending);

        let last = Frame { fin: true, opcode: OpCode::Continuation, payload: b"lo".to_vec() };
        assert_eq!(
            registry.reassemble(id(1), last),
            Reassembled::Message(OpCode::Text, b"hello".to_vec())
        );
    }

    #[test]
    fn control_frames_bypass_reassembly() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        let ping = Frame::ping(Vec::new());
        assert_eq!(
            registry.reassemble(id(1), ping.clone()),
            Reassembled::Control(ping)
        );
    }

    #[test]
    fn broadcast_to_room_only_reaches_members() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        registry.register(id(2));
        registry.join_room(id(1), "lobby");

        registry.broadcast_to_room("lobby", Frame::text("hi"), None);
        assert_eq!(registry.drain_outbound(id(1)).len(), 1);
        assert_eq!(registry.drain_outbound(id(2)).len(), 0);
    }

    #[test]
    fn unregister_clears_room_membership() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        registry.join_room(id(1), "lobby");
        registry.unregister(id(1));
        registry.register(id(2));
        registry.broadcast_to_room("lobby", Frame::text("hi"), None);
        assert_eq!(registry.drain_outbound(id(2)).len(), 0);
    }

    #[test]
    fn broadcast_skips_the_excluded_connection() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        registry.register(id(2));
        registry.broadcast(Frame::text("hi"), Some(id(1)));
        assert_eq!(registry.drain_outbound(id(1)).len(), 0);
        assert_eq!(registry.drain_outbound(id(2)).len(), 1);
    }

    #[test]
    fn broadcast_to_room_skips_the_excluded_connection() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        registry.register(id(2));
        registry.join_room(id(1), "lobby");
        registry.join_room(id(2), "lobby");
        registry.broadcast_to_room("lobby", Frame::text("hi"), Some(id(1)));
        assert_eq!(registry.drain_outbound(id(1)).len(), 0);
        assert_eq!(registry.drain_outbound(id(2)).len(), 1);
    }

    #[test]
    fn non_continuation_frame_mid_fragment_is_a_protocol_error() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        let first = Frame { fin: false, opcode: OpCode::Text, payload: b"hel".to_vec() };
        assert_eq!(registry.reassemble(id(1), first), Reassembled::Pending);

        let interloper = Frame { fin: false, opcode: OpCode::Binary, payload: b"oops".to_vec() };
        assert_eq!(registry.reassemble(id(1), interloper), Reassembled::ProtocolError);
    }

    #[test]
    fn continuation_without_an_open_fragment_is_a_protocol_error() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        let stray = Frame { fin: true, opcode: OpCode::Continuation, payload: b"lo".to_vec() };
        assert_eq!(registry.reassemble(id(1), stray), Reassembled::ProtocolError);
    }

    #[test]
    fn ping_due_after_interval_then_timed_out_after_missed_pong() {
        let mut registry = WsRegistry::new();
        registry.register(id(1));
        assert!(registry.due_for_ping(std::time::Duration::ZERO).contains(&id(1)));
        registry.mark_ping_sent(id(1));
        assert!(registry.timed_out(std::time::Duration::ZERO).contains(&id(1)));
        registry.record_pong(id(1));
        assert!(registry.timed_out(std::time::Duration::ZERO).is_empty());
    }
}

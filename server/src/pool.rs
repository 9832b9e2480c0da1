//! The bounded connection pool (§4.2), grounded on the teacher's
//! `src/multilistener.rs` and `server/src/listener.rs`, both of which key
//! live connections by a `slab::Slab` index.

use std::time::Duration;

use slab::Slab;

use crate::connection::{ConnId, ConnState, Connection, SharedConnection};
use crate::net::TcpStream;

#[derive(Debug)]
struct Slot<S: TcpStream> {
    conn: SharedConnection<S>,
    generation: u64,
}

/// A bounded set of live connections, keyed by a generation-stamped
/// identity so a stale back-reference from the request queue or the
/// pending-responses map can be detected after its slot is reused (§9).
#[derive(Debug)]
pub struct ConnectionPool<S: TcpStream> {
    slots: Slab<Slot<S>>,
    max_connections: usize,
    next_generation: u64,
}

impl<S: TcpStream> Default for ConnectionPool<S> {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl<S: TcpStream> ConnectionPool<S> {
    /// Creates an empty pool bounded at `max_connections`.
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: Slab::new(),
            max_connections,
            next_generation: 0,
        }
    }

    /// The number of connections currently held.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool holds no connections.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the pool is at capacity; `accept()` must reject new
    /// connections while this holds (§3's pool-size invariant).
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.max_connections
    }

    /// Inserts a new connection, returning its stable identity. Returns
    /// `None` if the pool is already full.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<ConnId> {
        if self.is_full() {
            return None;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let entry = self.slots.vacant_entry();
        let index = entry.key();
        entry.insert(Slot {
            conn: std::sync::Arc::new(std::sync::Mutex::new(conn)),
            generation,
        });
        Some(ConnId { index, generation })
    }

    /// Looks up a connection by mio token (the slab index), used by the
    /// poll loop which only has the `Token` to hand.
    pub fn get_by_index(&self, index: usize) -> Option<SharedConnection<S>> {
        self.slots.get(index).map(|s| s.conn.clone())
    }

    /// Looks up a connection by its generation-stamped identity,
    /// returning `None` if the slot has since been reused (a stale
    /// reference, per §9).
    pub fn get(&self, id: ConnId) -> Option<SharedConnection<S>> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .map(|s| s.conn.clone())
    }

    /// The full identity (index + current generation) for a slot, given
    /// just its index. Used right after `accept()` registers a socket.
    pub fn id_for_index(&self, index: usize) -> Option<ConnId> {
        self.slots.get(index).map(|s| ConnId {
            index,
            generation: s.generation,
        })
    }

    /// Removes and closes the connection at `index`, if present.
    pub fn remove_by_index(&mut self, index: usize) {
        if self.slots.contains(index) {
            let slot = self.slots.remove(index);
            if let Ok(mut conn) = slot.conn.lock() {
                conn.close();
            };
        }
    }

    /// Closes and removes every connection whose idle time exceeds
    /// `timeout` and that is not mid-response, returning the count
    /// removed (§4.2's `removeTimedOut`).
    pub fn remove_timed_out(&mut self, timeout: Duration) -> usize {
        let stale: Vec<usize> = self
            .slots
            .iter()
            .filter_map(|(index, slot)| {
                let conn = slot.conn.lock().ok()?;
                let mid_response = matches!(
                    conn.state(),
                    ConnState::AwaitingResponse | ConnState::WritingResponse
                );
                if !mid_response && conn.is_idle_timed_out(timeout) {
                    Some(index)
                } else {
                    None
                }
            })
            .collect();

        for index in &stale {
            self.remove_by_index(*index);
        }
        stale.len()
    }

    /// Iterates over every live `(index, connection)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SharedConnection<S>)> {
        self.slots.iter().map(|(i, s)| (i, &s.conn))
    }
}

//! The centralized architecture (§4.7): the master owns the listening
//! socket, accepts every connection itself, and hands each accepted FD
//! to a worker selected by a pluggable [`crate::worker_pool::balancer::Balancer`]
//! over that worker's [`crate::worker_pool::control_channel::ControlChannel`].

use std::io::{self, ErrorKind};
use std::net::TcpListener;
use std::os::fd::AsRawFd;

use crate::worker_pool::balancer::Balancer;
use crate::worker_pool::control_channel::{ConnectionMetadata, ControlChannel};

/// Master-side state for the centralized architecture: the shared
/// listener, one control channel per worker, and per-worker connection
/// counts for the balancer.
pub struct CentralizedMaster {
    listener: TcpListener,
    channels: Vec<ControlChannel>,
    connection_counts: Vec<usize>,
    balancer: Box<dyn Balancer + Send>,
}

impl std::fmt::Debug for CentralizedMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralizedMaster")
            .field("workers", &self.channels.len())
            .field("connection_counts", &self.connection_counts)
            .finish()
    }
}

impl CentralizedMaster {
    /// Creates a centralized master bound to `listener`, dispatching
    /// across `channels` (the master-side half of each worker's control
    /// channel pair, in worker-index order) using `balancer`.
    pub fn new(listener: TcpListener, channels: Vec<ControlChannel>, balancer: Box<dyn Balancer + Send>) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let connection_counts = vec![0; channels.len()];
        Ok(Self { listener, channels, connection_counts, balancer })
    }

    /// Accepts every connection currently pending (non-blocking, stops
    /// at `WouldBlock`) and hands each off to the balancer-selected
    /// worker. Returns the number of connections handed off.
    pub fn accept_and_dispatch(&mut self) -> io::Result<usize> {
        let mut dispatched = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let worker = self.balancer.select(&self.connection_counts);
                    let metadata = ConnectionMetadata::now(worker as u32, peer.ip());
                    if let Err(err) = self.channels[worker].send_connection(stream.as_raw_fd(), &metadata) {
                        log::error!("failed to hand connection to worker {worker}: {err}");
                        continue;
                    }
                    // The worker now owns the underlying fd (it was
                    // duplicated across SCM_RIGHTS); drop our copy.
                    drop(stream);
                    self.connection_counts[worker] += 1;
                    dispatched += 1;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(dispatched)
    }

    /// Records that `worker` reported a connection closing, per Open
    /// Question resolution #1: bookkeeping decrements on an explicit
    /// signal sent back over the same control channel, rather than
    /// periodic polling.
    pub fn record_connection_closed(&mut self, worker: usize) {
        if let Some(count) = self.connection_counts.get_mut(worker) {
            *count = count.saturating_sub(1);
        }
    }

    /// Drains every pending "connection closed" notification from every
    /// worker's control channel and applies it via
    /// [`CentralizedMaster::record_connection_closed`]. The master's own
    /// poll loop calls this once per tick, the same cadence it already
    /// uses for `accept_and_dispatch`.
    pub fn poll_connection_closed(&mut self) {
        for worker in 0..self.channels.len() {
            loop {
                match self.channels[worker].try_recv_connection_closed() {
                    Ok(Some(reported_worker)) => {
                        self.record_connection_closed(reported_worker as usize);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::error!("control channel read failed for worker {worker}: {err}");
                        break;
                    }
                }
            }
        }
    }

    /// Current tracked connection count per worker.
    pub fn connection_counts(&self) -> &[usize] {
        &self.connection_counts
    }
}

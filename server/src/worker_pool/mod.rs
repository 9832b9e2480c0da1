//! The worker pool master (§4.7): process supervision plus a choice of
//! two dispatch architectures, selected at startup by a capability
//! probe.

pub mod balancer;
pub mod control_channel;
pub mod master;
pub mod shared_listen;

#[cfg(unix)]
pub mod centralized;

pub use balancer::{Balancer, LeastConnections, RoundRobin};
pub use control_channel::{ConnectionMetadata, ControlChannel};
pub use master::{WorkerMode, WorkerPoolConfig, WorkerPoolMaster};

/// Which dispatch architecture a deployment is running under, exposed
/// via [`crate::metrics::MetricsSnapshot`]-adjacent diagnostics per §9's
/// capability-probe design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// Each worker binds its own listener; the kernel distributes
    /// connections.
    SharedListen,
    /// The master owns the listener and hands FDs to workers over a
    /// control channel.
    Centralized,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Architecture::SharedListen => "shared-listen",
            Architecture::Centralized => "centralized",
        })
    }
}

/// Probes whether FD passing is available on this platform and picks
/// the dispatch architecture accordingly: centralized when the control
/// channel can actually pass descriptors, shared-listen otherwise.
pub fn probe_architecture() -> Architecture {
    match control_channel::probe() {
        Ok(()) => Architecture::Centralized,
        Err(err) => {
            log::info!("centralized worker-pool architecture unavailable ({err}); falling back to shared-listen");
            Architecture::SharedListen
        }
    }
}

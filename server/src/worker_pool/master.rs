//! Process supervision for the worker pool (§4.7): forking workers,
//! non-blocking reap with auto-restart, and signal-driven shutdown.
//!
//! `fork`/`waitpid`/`kill` have no portable `std` equivalent, so this
//! talks to `libc` directly on Unix; off Unix, spawning always fails
//! with [`ServerError::Unsupported`] (there is no worker-pool deployment
//! story without a process model to fork into).

use std::time::Duration;

/// How a worker pool deployment dispatches accepted connections to
/// workers, per §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// The master invokes a user callback synchronously for each FD
    /// delivery.
    PerConnectionCallback,
    /// The master calls the user's `run(worker_id, server)` once at
    /// worker startup; that function owns its own cooperative loop.
    EventDrivenLongLived,
}

/// Supervision policy for the worker pool master.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker processes to maintain.
    pub worker_count: usize,
    /// Whether a worker that exits is automatically respawned.
    pub auto_restart: bool,
    /// Delay before respawning a dead worker.
    pub restart_delay: Duration,
    /// How long SIGTERM'd workers are given to exit before SIGKILL.
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            auto_restart: true,
            restart_delay: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[cfg(unix)]
pub use unix::WorkerPoolMaster;

#[cfg(unix)]
mod unix {
    use std::time::{Duration, Instant};

    use super::WorkerPoolConfig;
    use crate::error::ServerError;

    #[derive(Debug, Clone, Copy)]
    struct WorkerHandle {
        pid: libc::pid_t,
        index: usize,
    }

    /// Owns the set of live worker processes and the policy for
    /// supervising them.
    #[derive(Debug)]
    pub struct WorkerPoolMaster {
        config: WorkerPoolConfig,
        workers: Vec<WorkerHandle>,
        shutting_down: bool,
    }

    impl WorkerPoolMaster {
        /// Creates an empty master under `config`; no workers are forked
        /// until [`WorkerPoolMaster::spawn_all`] is called.
        pub fn new(config: WorkerPoolConfig) -> Self {
            Self { config, workers: Vec::new(), shutting_down: false }
        }

        /// Forks `config.worker_count` children, each running
        /// `worker_fn(index)` and exiting with status 0 when it returns.
        pub fn spawn_all(&mut self, worker_fn: impl Fn(usize) + Clone) -> Result<(), ServerError> {
            for index in 0..self.config.worker_count {
                self.fork_worker(index, worker_fn.clone())?;
            }
            Ok(())
        }

        fn fork_worker(&mut self, index: usize, worker_fn: impl Fn(usize)) -> Result<(), ServerError> {
            // SAFETY: fork() duplicates the calling process; the child
            // branch only runs `worker_fn` and then exits, never
            // returning into the rest of the master's control flow.
            match unsafe { libc::fork() } {
                -1 => Err(ServerError::Io(std::io::Error::last_os_error())),
                0 => {
                    worker_fn(index);
                    std::process::exit(0);
                }
                pid => {
                    self.workers.push(WorkerHandle { pid, index });
                    Ok(())
                }
            }
        }

        /// Non-blocking reap of any workers that have exited; respawns
        /// them at the same index if `auto_restart` is set and the
        /// master is not mid-shutdown. Call once per supervisor tick.
        pub fn reap_and_supervise(&mut self, worker_fn: impl Fn(usize) + Clone) {
            let mut dead = Vec::new();
            self.workers.retain(|handle| {
                let mut status = 0;
                // SAFETY: waitpid with WNOHANG never blocks and only
                // inspects children of this process.
                let ret = unsafe { libc::waitpid(handle.pid, &mut status, libc::WNOHANG) };
                if ret == handle.pid {
                    dead.push(handle.index);
                    false
                } else {
                    true
                }
            });

            if self.shutting_down || !self.config.auto_restart {
                return;
            }
            for index in dead {
                log::warn!("worker {index} exited; respawning in {:?}", self.config.restart_delay);
                std::thread::sleep(self.config.restart_delay);
                if let Err(err) = self.fork_worker(index, worker_fn.clone()) {
                    log::error!("failed to respawn worker {index}: {err}");
                }
            }
        }

        /// Sends SIGTERM to every worker, waits up to `shutdown_grace`
        /// for them to exit, then SIGKILLs any survivors and reaps them.
        pub fn shutdown(&mut self) {
            self.shutting_down = true;
            for handle in &self.workers {
                // SAFETY: kill() with a valid pid and a standard signal.
                unsafe {
                    libc::kill(handle.pid, libc::SIGTERM);
                }
            }

            let deadline = Instant::now() + self.config.shutdown_grace;
            while Instant::now() < deadline && !self.workers.is_empty() {
                self.workers.retain(|handle| {
                    let mut status = 0;
                    let ret = unsafe { libc::waitpid(handle.pid, &mut status, libc::WNOHANG) };
                    ret != handle.pid
                });
                if !self.workers.is_empty() {
                    std::thread::sleep(Duration::from_millis(20));
                }
            }

            for handle in &self.workers {
                // SAFETY: as above; SIGKILL cannot be caught or ignored,
                // guaranteeing termination of any survivor.
                unsafe {
                    libc::kill(handle.pid, libc::SIGKILL);
                    let mut status = 0;
                    libc::waitpid(handle.pid, &mut status, 0);
                }
            }
            self.workers.clear();
        }

        /// Number of workers currently tracked as alive.
        pub fn worker_count(&self) -> usize {
            self.workers.len()
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn spawns_and_reaps_workers_that_exit_immediately() {
            let mut master = WorkerPoolMaster::new(WorkerPoolConfig {
                worker_count: 2,
                auto_restart: false,
                ..Default::default()
            });
            master.spawn_all(|_index| {}).unwrap();
            assert_eq!(master.worker_count(), 2);

            // Give the forked children a moment to exit on their own.
            std::thread::sleep(Duration::from_millis(50));
            master.reap_and_supervise(|_| {});
            assert_eq!(master.worker_count(), 0);
        }

        #[test]
        fn shutdown_terminates_long_lived_workers() {
            let mut master = WorkerPoolMaster::new(WorkerPoolConfig {
                worker_count: 1,
                auto_restart: false,
                shutdown_grace: Duration::from_millis(200),
                ..Default::default()
            });
            master
                .spawn_all(|_index| loop {
                    std::thread::sleep(Duration::from_secs(1));
                })
                .unwrap();
            master.shutdown();
            assert_eq!(master.worker_count(), 0);
        }
    }
}

#[cfg(not(unix))]
pub use non_unix::WorkerPoolMaster;

#[cfg(not(unix))]
mod non_unix {
    use super::WorkerPoolConfig;
    use crate::error::ServerError;

    /// Non-Unix stand-in: there is no process model to fork into, so
    /// every operation fails closed.
    #[derive(Debug)]
    pub struct WorkerPoolMaster {
        config: WorkerPoolConfig,
    }

    impl WorkerPoolMaster {
        /// Creates a master that will refuse to spawn anything.
        pub fn new(config: WorkerPoolConfig) -> Self {
            Self { config }
        }

        /// Always fails off Unix.
        pub fn spawn_all(&mut self, _worker_fn: impl Fn(usize) + Clone) -> Result<(), ServerError> {
            let _ = &self.config;
            Err(ServerError::Unsupported(
                "process-based worker pools require a Unix target".into(),
            ))
        }

        /// No-op: nothing was ever spawned.
        pub fn reap_and_supervise(&mut self, _worker_fn: impl Fn(usize) + Clone) {}

        /// No-op: nothing was ever spawned.
        pub fn shutdown(&mut self) {}

        /// Always zero off Unix.
        pub fn worker_count(&self) -> usize {
            0
        }
    }
}

//! The FD control channel (§4.8): a Unix-domain stream socket pair the
//! centralized-architecture master uses to hand an accepted connection's
//! file descriptor to a worker, alongside a small fixed-schema metadata
//! blob (`worker_id`, `client_ip`, `timestamp`).
//!
//! File-descriptor passing is an OS-level facility (`SCM_RIGHTS`
//! ancillary messages over `sendmsg`/`recvmsg`) with no portable
//! abstraction in `std`, so this module talks to it directly through
//! `libc` on Unix targets; non-Unix targets compile but every operation
//! returns [`ServerError::Unsupported`], which is what lets the
//! capability probe in [`crate::worker_pool`] fail closed to the
//! shared-listen architecture.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ServerError;

/// The fixed-schema metadata accompanying a passed file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionMetadata {
    /// The worker the master selected to own this connection.
    pub worker_id: u32,
    /// The accepted connection's peer address.
    pub client_ip: IpAddr,
    /// Unix timestamp, in seconds, of when the master accepted it.
    pub timestamp: u64,
}

impl ConnectionMetadata {
    /// Builds a metadata record stamped with the current time.
    pub fn now(worker_id: u32, client_ip: IpAddr) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { worker_id, client_ip, timestamp }
    }

    /// Encodes the record as `v1|worker_id|client_ip|timestamp`.
    pub fn encode(&self) -> Vec<u8> {
        format!("v1|{}|{}|{}", self.worker_id, self.client_ip, self.timestamp).into_bytes()
    }

    /// Decodes a record produced by [`ConnectionMetadata::encode`].
    /// Malformed input (wrong version, wrong field count, unparseable
    /// field) is rejected per §4.8: "malformed metadata -> log and close
    /// the received FD."
    pub fn decode(bytes: &[u8]) -> Result<Self, ServerError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ServerError::ControlChannel("metadata is not valid UTF-8".into()))?;
        let mut parts = text.split('|');
        let version = parts
            .next()
            .ok_or_else(|| ServerError::ControlChannel("missing metadata version".into()))?;
        if version != "v1" {
            return Err(ServerError::ControlChannel(format!(
                "unsupported metadata version {version}"
            )));
        }
        let worker_id: u32 = parts
            .next()
            .ok_or_else(|| ServerError::ControlChannel("missing worker_id".into()))?
            .parse()
            .map_err(|_| ServerError::ControlChannel("invalid worker_id".into()))?;
        let client_ip: IpAddr = parts
            .next()
            .ok_or_else(|| ServerError::ControlChannel("missing client_ip".into()))?
            .parse()
            .map_err(|_| ServerError::ControlChannel("invalid client_ip".into()))?;
        let timestamp: u64 = parts
            .next()
            .ok_or_else(|| ServerError::ControlChannel("missing timestamp".into()))?
            .parse()
            .map_err(|_| ServerError::ControlChannel("invalid timestamp".into()))?;
        if parts.next().is_some() {
            return Err(ServerError::ControlChannel("trailing metadata fields".into()));
        }
        Ok(Self { worker_id, client_ip, timestamp })
    }
}

#[cfg(unix)]
pub use unix::ControlChannel;

#[cfg(unix)]
mod unix {
    use std::io::{self, Read, Write};
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::os::unix::net::UnixStream;

    use super::ConnectionMetadata;
    use crate::error::ServerError;

    const METADATA_BUF_LEN: usize = 256;

    /// One end of a master<->worker FD-passing socket pair.
    #[derive(Debug)]
    pub struct ControlChannel {
        stream: UnixStream,
    }

    impl ControlChannel {
        /// Creates a connected, non-blocking pair (one for the master,
        /// one for the worker) for use before `fork()`.
        pub fn pair() -> io::Result<(ControlChannel, ControlChannel)> {
            let (a, b) = UnixStream::pair()?;
            a.set_nonblocking(true)?;
            b.set_nonblocking(true)?;
            Ok((ControlChannel { stream: a }, ControlChannel { stream: b }))
        }

        /// Master side: sends `fd` plus its metadata over the channel.
        pub fn send_connection(&self, fd: RawFd, metadata: &ConnectionMetadata) -> io::Result<()> {
            let payload = metadata.encode();
            send_fd(&self.stream, fd, &payload)
        }

        /// Worker side: a single non-blocking attempt to receive one
        /// passed FD. Returns `Ok(None)` if nothing is available yet
        /// (`WouldBlock`), propagating any other I/O error.
        pub fn try_recv_connection(&self) -> io::Result<Option<(OwnedFd, ConnectionMetadata)>> {
            let mut buf = [0u8; METADATA_BUF_LEN];
            match recv_fd(&self.stream, &mut buf) {
                Ok((n, Some(fd))) => match ConnectionMetadata::decode(&buf[..n]) {
                    Ok(metadata) => Ok(Some((fd, metadata))),
                    Err(err) => {
                        log::warn!("dropping connection with malformed control metadata: {err}");
                        Ok(None)
                    }
                },
                Ok((_, None)) => Ok(None),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(err) => Err(err),
            }
        }

        /// Worker side: reports that a connection it owned has closed, so
        /// the master can decrement its per-worker connection count
        /// (Open Question resolution #1 in `DESIGN.md`). Travels in the
        /// opposite direction of `send_connection`/`try_recv_connection`
        /// on the same full-duplex socket, so the two never collide.
        pub fn send_connection_closed(&self, worker_id: u32) -> io::Result<()> {
            let payload = format!("closed|{worker_id}");
            (&self.stream).write_all(payload.as_bytes())
        }

        /// Master side: a single non-blocking attempt to receive one
        /// "connection closed" notification. Returns `Ok(None)` if
        /// nothing is available yet, or if a malformed message arrived
        /// (logged and dropped, same policy as malformed FD metadata).
        pub fn try_recv_connection_closed(&self) -> io::Result<Option<u32>> {
            let mut buf = [0u8; 64];
            match (&self.stream).read(&mut buf) {
                Ok(0) => Ok(None),
                Ok(n) => match std::str::from_utf8(&buf[..n]).ok().and_then(|s| s.strip_prefix("closed|")).and_then(|s| s.parse().ok()) {
                    Some(worker_id) => Ok(Some(worker_id)),
                    None => {
                        log::warn!("dropping malformed connection-closed notification");
                        Ok(None)
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(err) => Err(err),
            }
        }
    }

    fn send_fd(sock: &UnixStream, fd: RawFd, payload: &[u8]) -> io::Result<()> {
        unsafe {
            let mut iov = libc::iovec {
                iov_base: payload.as_ptr() as *mut libc::c_void,
                iov_len: payload.len(),
            };

            let cmsg_space = libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) as usize;
            let mut cmsg_buf = vec![0u8; cmsg_space];

            let mut msg: libc::msghdr = mem::zeroed();
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = cmsg_space as _;

            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
            std::ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);

            let ret = libc::sendmsg(sock.as_raw_fd(), &msg, 0);
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn recv_fd(sock: &UnixStream, buf: &mut [u8]) -> io::Result<(usize, Option<OwnedFd>)> {
        unsafe {
            let mut iov = libc::iovec {
                iov_base: buf.as_mut_ptr() as *mut libc::c_void,
                iov_len: buf.len(),
            };

            let cmsg_space = libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) as usize;
            let mut cmsg_buf = vec![0u8; cmsg_space];

            let mut msg: libc::msghdr = mem::zeroed();
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = cmsg_space as _;

            let n = libc::recvmsg(sock.as_raw_fd(), &mut msg, 0);
            if n < 0 {
                return Err(io::Error::last_os_error());
            }

            let mut received_fd = None;
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            if !cmsg.is_null()
                && (*cmsg).cmsg_level == libc::SOL_SOCKET
                && (*cmsg).cmsg_type == libc::SCM_RIGHTS
            {
                let fd_ptr = libc::CMSG_DATA(cmsg) as *const RawFd;
                received_fd = Some(OwnedFd::from_raw_fd(std::ptr::read(fd_ptr)));
            }

            Ok((n as usize, received_fd))
        }
    }

    /// Probes whether this platform can actually pass file descriptors
    /// (always true once compiled on `cfg(unix)`, but exercised at
    /// startup so the failure mode is a clean fallback rather than a
    /// panic, per §9's capability-probe design note).
    pub fn probe() -> Result<(), ServerError> {
        ControlChannel::pair().map(|_| ()).map_err(|e| {
            ServerError::ControlChannel(format!("failed to create control socket pair: {e}"))
        })
    }
}

#[cfg(not(unix))]
pub use non_unix::ControlChannel;

#[cfg(not(unix))]
mod non_unix {
    use super::ConnectionMetadata;
    use crate::error::ServerError;

    /// A placeholder raw descriptor type; off Unix there is no FD
    /// passing facility to describe, so this carries no real meaning.
    pub type RawFd = i32;
    /// A placeholder owned-descriptor type, mirroring [`RawFd`] above.
    #[derive(Debug)]
    pub struct OwnedFd;

    /// Non-Unix stand-in: every operation fails so the centralized
    /// architecture's capability probe fails closed to shared-listen.
    #[derive(Debug)]
    pub struct ControlChannel;

    impl ControlChannel {
        /// Always unsupported off Unix.
        pub fn pair() -> std::io::Result<(ControlChannel, ControlChannel)> {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "FD passing is not supported on this platform",
            ))
        }

        /// Always unsupported off Unix.
        pub fn send_connection(&self, _fd: RawFd, _metadata: &ConnectionMetadata) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "unsupported platform"))
        }

        /// Always unsupported off Unix.
        pub fn try_recv_connection(&self) -> std::io::Result<Option<(OwnedFd, ConnectionMetadata)>> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "unsupported platform"))
        }

        /// Always unsupported off Unix.
        pub fn send_connection_closed(&self, _worker_id: u32) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "unsupported platform"))
        }

        /// Always unsupported off Unix.
        pub fn try_recv_connection_closed(&self) -> std::io::Result<Option<u32>> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "unsupported platform"))
        }
    }

    /// Always fails on non-Unix platforms.
    pub fn probe() -> Result<(), ServerError> {
        Err(ServerError::Unsupported(
            "FD passing requires a Unix target".into(),
        ))
    }
}

#[cfg(unix)]
pub use unix::probe;
#[cfg(not(unix))]
pub use non_unix::probe;

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::os::fd::AsRawFd;

    #[test]
    fn metadata_round_trips() {
        let metadata = ConnectionMetadata::now(3, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        let decoded = ConnectionMetadata::decode(&metadata.encode()).unwrap();
        assert_eq!(metadata, decoded);
    }

    #[test]
    fn rejects_malformed_metadata() {
        assert!(ConnectionMetadata::decode(b"not-the-schema").is_err());
        assert!(ConnectionMetadata::decode(b"v2|1|127.0.0.1|0").is_err());
    }

    #[test]
    fn passes_a_real_fd_with_metadata_across_the_pair() {
        let (master, worker) = unix::ControlChannel::pair().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = listener.as_raw_fd();
        let metadata = ConnectionMetadata::now(1, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));

        master.send_connection(fd, &metadata).unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(pair) = worker.try_recv_connection().unwrap() {
                received = Some(pair);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (owned_fd, decoded) = received.expect("fd should have arrived");
        assert_eq!(decoded, metadata);
        drop(owned_fd);
    }

    #[test]
    fn connection_closed_notification_round_trips() {
        let (master, worker) = unix::ControlChannel::pair().unwrap();
        worker.send_connection_closed(7).unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(worker_id) = master.try_recv_connection_closed().unwrap() {
                received = Some(worker_id);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(received, Some(7));
    }
}

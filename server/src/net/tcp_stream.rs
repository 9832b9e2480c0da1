//! A `TcpStream` abstraction over `mio::net` and `std::net`, plus a small
//! read/write facade so [`crate::connection::Connection`] does not care
//! whether the underlying bytes are plaintext or TLS-terminated.

use std::io::{Error, Read, Result, Write};
use std::net::{Shutdown, SocketAddr};

/// A connected stream socket.
pub trait TcpStream: Read + Write {
    /// Connects to `addr`.
    fn connect(addr: SocketAddr) -> Result<Self>
    where
        Self: Sized;

    /// The remote peer's address.
    fn peer_addr(&self) -> Result<SocketAddr>;

    /// This socket's local address.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Shuts down the read, write, or both halves of the connection.
    fn shutdown(&self, how: Shutdown) -> Result<()>;

    /// Sets `TCP_NODELAY`.
    fn set_nodelay(&self, nodelay: bool) -> Result<()>;

    /// Gets the current `TCP_NODELAY` setting.
    fn nodelay(&self) -> Result<bool>;

    /// Sets the IP time-to-live.
    fn set_ttl(&self, ttl: u32) -> Result<()>;

    /// Gets the configured time-to-live.
    fn ttl(&self) -> Result<u32>;

    /// Takes and clears the socket's pending error, if any.
    fn take_error(&self) -> Result<Option<Error>>;

    /// Peeks at buffered bytes without consuming them.
    fn peek(&self, buf: &mut [u8]) -> Result<usize>;
}

impl TcpStream for mio::net::TcpStream {
    #[inline]
    fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect(addr)
    }

    #[inline]
    fn peer_addr(&self) -> Result<SocketAddr> {
        Self::peer_addr(self)
    }

    #[inline]
    fn local_addr(&self) -> Result<SocketAddr> {
        Self::local_addr(self)
    }

    #[inline]
    fn shutdown(&self, how: Shutdown) -> Result<()> {
        Self::shutdown(self, how)
    }

    #[inline]
    fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Self::set_nodelay(self, nodelay)
    }

    #[inline]
    fn nodelay(&self) -> Result<bool> {
        Self::nodelay(self)
    }

    #[inline]
    fn set_ttl(&self, ttl: u32) -> Result<()> {
        Self::set_ttl(self, ttl)
    }

    #[inline]
    fn ttl(&self) -> Result<u32> {
        Self::ttl(self)
    }

    #[inline]
    fn take_error(&self) -> Result<Option<Error>> {
        Self::take_error(self)
    }

    #[inline]
    fn peek(&self, buf: &mut [u8]) -> Result<usize> {
        Self::peek(self, buf)
    }
}

impl TcpStream for std::net::TcpStream {
    #[inline]
    fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = Self::connect(addr)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }

    #[inline]
    fn peer_addr(&self) -> Result<SocketAddr> {
        Self::peer_addr(self)
    }

    #[inline]
    fn local_addr(&self) -> Result<SocketAddr> {
        Self::local_addr(self)
    }

    #[inline]
    fn shutdown(&self, how: Shutdown) -> Result<()> {
        Self::shutdown(self, how)
    }

    #[inline]
    fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Self::set_nodelay(self, nodelay)
    }

    #[inline]
    fn nodelay(&self) -> Result<bool> {
        Self::nodelay(self)
    }

    #[inline]
    fn set_ttl(&self, ttl: u32) -> Result<()> {
        Self::set_ttl(self, ttl)
    }

    #[inline]
    fn ttl(&self) -> Result<u32> {
        Self::ttl(self)
    }

    #[inline]
    fn take_error(&self) -> Result<Option<Error>> {
        Self::take_error(self)
    }

    #[inline]
    fn peek(&self, buf: &mut [u8]) -> Result<usize> {
        Self::peek(self, buf)
    }
}

//! A `TcpListener` abstraction over `mio::net` and `std::net`.

use std::io::{Error, Result};
use std::net::SocketAddr;

use super::tcp_stream::TcpStream;

/// A listening socket capable of non-blocking accepts.
pub trait TcpListener<S: TcpStream> {
    /// Binds a new listener to `addr`.
    fn bind(addr: SocketAddr) -> Result<Self>
    where
        Self: Sized;

    /// Accepts one pending connection, or `WouldBlock` if none is ready.
    fn accept(&self) -> Result<(S, SocketAddr)>;

    /// The address this listener is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Sets the IP time-to-live for accepted sockets.
    fn set_ttl(&self, ttl: u32) -> Result<()>;

    /// Gets the configured time-to-live.
    fn ttl(&self) -> Result<u32>;

    /// Takes and clears the socket's pending error, if any.
    fn take_error(&self) -> Result<Option<Error>>;
}

type MTcpListener = mio::net::TcpListener;
type MTcpStream = mio::net::TcpStream;

impl TcpListener<MTcpStream> for MTcpListener {
    #[inline]
    fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind(addr)
    }

    #[inline]
    fn accept(&self) -> Result<(MTcpStream, SocketAddr)> {
        Self::accept(self)
    }

    #[inline]
    fn local_addr(&self) -> Result<SocketAddr> {
        Self::local_addr(self)
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
}

type STcpListener = std::net::TcpListener;
type STcpStream = std::net::TcpStream;

impl TcpListener<STcpStream> for STcpListener {
    #[inline]
    fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = Self::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    #[inline]
    fn accept(&self) -> Result<(STcpStream, SocketAddr)> {
        Self::accept(self)
    }

    #[inline]
    fn local_addr(&self) -> Result<SocketAddr> {
        Self::local_addr(self)
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
}

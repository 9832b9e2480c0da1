//! The shared-listen architecture (§4.7): each worker independently
//! binds the listening socket with address/port reuse and lets the
//! kernel distribute incoming connections across them. No IPC on the
//! data path; the master only forks and supervises.

use std::io;
use std::net::SocketAddr;

/// Binds a `TcpListener` for `addr`, enabling `SO_REUSEADDR` and, where
/// the platform supports it, `SO_REUSEPORT` so multiple worker processes
/// can each bind the same address/port and have the kernel load-balance
/// accepted connections between them. On platforms without
/// `SO_REUSEPORT`, this still binds (only one worker can own the port;
/// that worker effectively becomes the sole acceptor), matching the
/// portable fallback described in §4.7.
pub fn bind_shared(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    #[cfg(unix)]
    {
        unix::bind_with_reuseport(addr)
    }
    #[cfg(not(unix))]
    {
        std::net::TcpListener::bind(addr)
    }
}

#[cfg(unix)]
mod unix {
    use std::io;
    use std::net::SocketAddr;
    use std::os::fd::FromRawFd;

    pub fn bind_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
        let domain = if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };

        // SAFETY: standard socket(2)/setsockopt(2)/bind(2)/listen(2)
        // sequence; every fd returned is checked before further use, and
        // ownership is handed to `TcpListener` at the end so it is
        // closed exactly once.
        unsafe {
            let fd = libc::socket(domain, libc::SOCK_STREAM, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let enable: libc::c_int = 1;
            let opt_result = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &enable as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            if opt_result < 0 {
                libc::close(fd);
                return Err(io::Error::last_os_error());
            }

            // SO_REUSEPORT is Linux/BSD/macOS; best-effort, not fatal if
            // the platform rejects it.
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &enable as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );

            let (sockaddr, len) = socket_addr_to_raw(addr);
            if libc::bind(fd, &sockaddr as *const _ as *const libc::sockaddr, len) < 0 {
                libc::close(fd);
                return Err(io::Error::last_os_error());
            }
            if libc::listen(fd, 1024) < 0 {
                libc::close(fd);
                return Err(io::Error::last_os_error());
            }

            Ok(std::net::TcpListener::from_raw_fd(fd))
        }
    }

    fn socket_addr_to_raw(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let len = match addr {
            SocketAddr::V4(v4) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: v4.port().to_be(),
                    sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                    sin_zero: [0; 8],
                };
                unsafe {
                    std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
                }
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
            }
            SocketAddr::V6(v6) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: v6.port().to_be(),
                    sin6_flowinfo: 0,
                    sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                    sin6_scope_id: v6.scope_id(),
                };
                unsafe {
                    std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
                }
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
            }
        };
        (storage, len)
    }
}

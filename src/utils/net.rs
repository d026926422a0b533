//! Listening sockets for the HTTP server
//!
//! IPv6 sockets are bound v6-only, so `0.0.0.0` and `::` can be served side
//! by side on the same port.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
    SockaddrIn6,
};
use tracing::{debug, warn};

use crate::error::{AppError, Result};

fn stream_socket(family: AddressFamily) -> nix::Result<OwnedFd> {
    let fd = socket::socket(family, SockType::Stream, SockFlag::SOCK_CLOEXEC, SockProtocol::Tcp)?;
    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    Ok(fd)
}

/// Create, bind and listen on a stream socket for `addr`
fn listen_on(addr: SocketAddr) -> nix::Result<OwnedFd> {
    let fd = match addr {
        SocketAddr::V4(v4) => {
            let fd = stream_socket(AddressFamily::Inet)?;
            socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4))?;
            fd
        }
        SocketAddr::V6(v6) => {
            let fd = stream_socket(AddressFamily::Inet6)?;
            socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true)?;
            socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6))?;
            fd
        }
    };
    socket::listen(&fd, Backlog::MAXCONN)?;
    Ok(fd)
}

/// Bind a non-blocking TCP listener
pub fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::from(listen_on(addr)?);
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Bind and hand the listener to the tokio reactor
pub fn bind_tokio_listener(addr: SocketAddr) -> io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::from_std(bind_tcp_listener(addr)?)
}

/// Bind `port` on every address in `ips`.
///
/// An address that fails is logged and skipped; the call fails only when
/// none could be bound.
pub fn bind_all(ips: &[IpAddr], port: u16) -> Result<Vec<tokio::net::TcpListener>> {
    let mut listeners = Vec::with_capacity(ips.len());
    let mut last_err = None;

    for ip in ips {
        let addr = SocketAddr::new(*ip, port);
        match bind_tokio_listener(addr) {
            Ok(listener) => {
                debug!("Listening on {}", addr);
                listeners.push(listener);
            }
            Err(e) => {
                warn!("Failed to bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    if listeners.is_empty() {
        return Err(match last_err {
            Some(e) => AppError::Io(e),
            None => AppError::Config("no bind addresses".to_string()),
        });
    }
    Ok(listeners)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_v4() {
        let listener = bind_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let local = listener.local_addr().unwrap();
        assert!(local.is_ipv4());
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn test_bind_conflict() {
        let first = bind_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let taken = first.local_addr().unwrap();
        assert!(bind_tcp_listener(taken).is_err());
    }

    #[tokio::test]
    async fn test_bind_all_skips_failed_address() {
        let first = bind_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = first.local_addr().unwrap().port();

        let ips: Vec<IpAddr> = vec!["127.0.0.1".parse().unwrap(), "127.0.0.2".parse().unwrap()];
        let listeners = bind_all(&ips, port).unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(
            listeners[0].local_addr().unwrap(),
            SocketAddr::new("127.0.0.2".parse().unwrap(), port)
        );
    }

    #[tokio::test]
    async fn test_bind_all_fails_when_nothing_binds() {
        let first = bind_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = first.local_addr().unwrap().port();

        let ips: Vec<IpAddr> = vec!["127.0.0.1".parse().unwrap()];
        assert!(matches!(bind_all(&ips, port), Err(AppError::Io(_))));
        assert!(matches!(bind_all(&[], port), Err(AppError::Config(_))));
    }
}

//! TCP connection establishment.
//!
//! Builds the session socket in the order the protocol's servers expect
//! their clients to: resolve the host, create a stream socket, disable
//! lingering on close, enable keep-alive probing, connect, then switch
//! the socket to non-blocking so no later read or write can hang. Each
//! step reports its own [`ConnectError`] kind; a socket abandoned
//! part-way through is closed by `OwnedFd` drop.

use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};

use mio::net::TcpStream;
use rustix::net::sockopt;
use rustix::net::{AddressFamily, SocketType};
use thiserror::Error;

use crate::trace::debug;

/// Connection-phase errors, one per establishment step.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The host name did not resolve to any address.
    #[error("failed to resolve host {host:?}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },
    /// Creating the stream socket failed.
    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] io::Error),
    /// Setting a socket option failed.
    #[error("failed to set socket option: {0}")]
    SetOption(#[source] io::Error),
    /// The connection attempt itself failed (refused, unreachable, OS
    /// timeout).
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),
    /// Switching the connected socket to non-blocking failed.
    #[error("failed to switch socket to non-blocking: {0}")]
    SetNonblocking(#[source] io::Error),
    /// Registering the socket for readiness events failed.
    #[error("failed to register socket for readiness events: {0}")]
    Register(#[source] io::Error),
}

/// Opens a non-blocking stream to `host:port`.
///
/// # Errors
///
/// One [`ConnectError`] kind per failed step; see the variant docs.
pub fn open(host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    let addr = resolve(host, port)?;

    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::INET,
        SocketAddr::V6(_) => AddressFamily::INET6,
    };
    let fd = rustix::net::socket(family, SocketType::STREAM, None)
        .map_err(|e| ConnectError::SocketCreate(e.into()))?;

    // Nothing needs flushing through a close, and keep-alives surface a
    // dead peer between exchanges.
    sockopt::set_socket_linger(&fd, None).map_err(|e| ConnectError::SetOption(e.into()))?;
    sockopt::set_socket_keepalive(&fd, true).map_err(|e| ConnectError::SetOption(e.into()))?;

    match addr {
        SocketAddr::V4(v4) => rustix::net::connect_v4(&fd, &v4),
        SocketAddr::V6(v6) => rustix::net::connect_v6(&fd, &v6),
    }
    .map_err(|e| ConnectError::Connect(e.into()))?;

    let stream = StdTcpStream::from(fd);
    stream
        .set_nonblocking(true)
        .map_err(ConnectError::SetNonblocking)?;

    debug!("connected to {addr}");
    Ok(TcpStream::from_std(stream))
}

/// Resolves `host:port`, preferring an IPv4 address when one exists.
fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let resolution_err = |source| ConnectError::Resolution {
        host: host.to_owned(),
        source,
    };
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(resolution_err)?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            resolution_err(io::Error::new(
                io::ErrorKind::NotFound,
                "resolver returned no addresses",
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn open_to_a_live_listener_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        let stream = open("127.0.0.1", port).expect("open");
        let peer = stream.peer_addr().expect("peer addr");
        assert_eq!(peer.port(), port);
    }

    #[test]
    fn refused_connection_reports_the_connect_step() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        match open("127.0.0.1", port) {
            Err(ConnectError::Connect(_)) => {}
            other => panic!("expected Connect error, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_host_reports_the_resolution_step() {
        match open("host.does-not-resolve.invalid", 8051) {
            Err(ConnectError::Resolution { host, .. }) => {
                assert_eq!(host, "host.does-not-resolve.invalid");
            }
            other => panic!("expected Resolution error, got {other:?}"),
        }
    }
}

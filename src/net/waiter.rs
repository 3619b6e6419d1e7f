//! Bounded wait for a response on the session socket.
//!
//! The session socket is non-blocking, so a read attempted before the
//! server has answered fails rather than waits. The waiter blocks on a
//! single-descriptor readiness poll with a hard deadline instead,
//! decoupling "is there a response" from the read itself.

use std::io;
use std::time::Duration;

use minstant::Instant;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use thiserror::Error;

/// Registration token for the single session socket.
const SESSION_SOCKET: Token = Token(0);

/// Outcome of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Data is available to read.
    Ready,
    /// No activity within the timeout.
    TimedOut,
}

/// Readiness-wait failures.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The descriptor reported an error or hangup with nothing left to
    /// read.
    #[error("socket reported error or hangup")]
    Gone,
    /// The readiness poll itself failed.
    #[error("readiness poll failed: {0}")]
    Poll(#[from] io::Error),
}

/// Readiness poller for one registered socket.
pub struct Waiter {
    poll: Poll,
    events: Events,
}

impl Waiter {
    /// Creates an empty poller.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS readiness facility cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
        })
    }

    /// Registers the session socket for readable events.
    ///
    /// # Errors
    ///
    /// Returns an error if registration with the poller fails.
    pub fn register(&self, stream: &mut TcpStream) -> io::Result<()> {
        self.poll
            .registry()
            .register(stream, SESSION_SOCKET, Interest::READABLE)
    }

    /// Removes the socket from the poller; teardown companion to
    /// [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket was not registered.
    pub fn deregister(&self, stream: &mut TcpStream) -> io::Result<()> {
        self.poll.registry().deregister(stream)
    }

    /// Waits up to `timeout` for the registered socket to become
    /// readable.
    ///
    /// Readable wins over simultaneous error/hangup conditions: data
    /// buffered before a peer close must remain readable. Spurious
    /// wakeups and interrupted polls retry against the original
    /// deadline, so the call returns no later than `timeout` plus
    /// scheduling noise.
    ///
    /// # Errors
    ///
    /// [`WaitError::Gone`] when the descriptor reports error or hangup
    /// with no readable data, [`WaitError::Poll`] when the readiness
    /// check itself fails.
    pub fn await_readable(&mut self, timeout: Duration) -> Result<Readiness, WaitError> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(Readiness::TimedOut);
            };
            match self.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WaitError::Poll(e)),
            }
            for event in &self.events {
                if event.is_readable() {
                    return Ok(Readiness::Ready);
                }
                if event.is_error() || event.is_read_closed() {
                    return Err(WaitError::Gone);
                }
            }
            // Woke with nothing usable; poll again until the deadline.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    /// A registered waiter plus both ends of a loopback connection.
    fn connected_waiter() -> (Waiter, TcpStream, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let client = StdTcpStream::connect(addr).expect("connect");
        client.set_nonblocking(true).expect("nonblocking");
        let mut client = TcpStream::from_std(client);
        let (peer, _) = listener.accept().expect("accept");

        let waiter = Waiter::new().expect("waiter");
        waiter.register(&mut client).expect("register");
        (waiter, client, peer)
    }

    #[test]
    fn silent_peer_times_out_within_bounds() {
        let (mut waiter, _client, _peer) = connected_waiter();

        let timeout = Duration::from_millis(50);
        let started = std::time::Instant::now();
        let outcome = waiter.await_readable(timeout).expect("await");
        let elapsed = started.elapsed();

        assert_eq!(outcome, Readiness::TimedOut);
        assert!(elapsed >= timeout, "returned early: {elapsed:?}");
        assert!(
            elapsed < timeout + Duration::from_millis(500),
            "overran the deadline: {elapsed:?}"
        );
    }

    #[test]
    fn pending_data_reports_ready() {
        let (mut waiter, _client, mut peer) = connected_waiter();

        peer.write_all(b"some.point\t0x10\t1.0\n").expect("write");
        let outcome = waiter
            .await_readable(Duration::from_secs(2))
            .expect("await");
        assert_eq!(outcome, Readiness::Ready);
    }

    #[test]
    fn data_sent_before_close_is_still_ready() {
        let (mut waiter, _client, mut peer) = connected_waiter();

        peer.write_all(b"some.point\t0x10\t1.0\n").expect("write");
        drop(peer);
        let outcome = waiter
            .await_readable(Duration::from_secs(2))
            .expect("await");
        assert_eq!(outcome, Readiness::Ready);
    }
}

//! Point query sessions.
//!
//! A [`Session`] owns one connected socket plus the fields decoded from
//! the most recent exchange. Operations are synchronous: write the
//! request, wait up to the configured timeout for the server to answer,
//! read once, decode. There is no background I/O and no retry — a
//! transport error is surfaced and the caller decides whether to
//! reconnect.
//!
//! The session has two states. Connected sessions run exchanges;
//! [`close`](Session::close) moves to Disconnected, where every exchange
//! answers [`ExchangeError::NotConnected`] without touching a socket.
//! Connectivity is per-session state: independent sessions on distinct
//! sockets never observe each other.

use std::io::{self, Read, Write};
use std::time::Duration;

use mio::net::TcpStream;
use thiserror::Error;

use crate::net::connector::{self, ConnectError};
use crate::net::waiter::{Readiness, WaitError, Waiter};
use crate::time::Bat;
use crate::trace::debug;
use crate::wire::{
    self, DecodeError, DetailedReading, EncodeError, Reading, ValueParsing, RESPONSE_CAPACITY,
};

/// Default bounded wait for a server response.
///
/// Sized for a LAN-local server; raise it through [`SessionConfig`] for
/// anything slower.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Session tunables, fixed at connect time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long each exchange waits for the server to answer.
    pub response_timeout: Duration,
    /// Parsing mode for decoded value fields.
    pub value_parsing: ValueParsing,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            value_parsing: ValueParsing::default(),
        }
    }
}

/// Exchange-phase errors. Connection-phase errors are [`ConnectError`].
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The session is not connected; no I/O was attempted.
    #[error("session is not connected")]
    NotConnected,
    /// Writing the request failed.
    #[error("failed to send request: {0}")]
    Send(#[source] io::Error),
    /// The server did not answer within the configured timeout.
    #[error("timed out waiting for response")]
    Timeout,
    /// The readiness wait failed or the socket reported error/hangup.
    #[error("readiness wait failed: {0}")]
    Poll(#[from] WaitError),
    /// Reading the response failed.
    #[error("failed to receive response: {0}")]
    Recv(#[source] io::Error),
    /// The request could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// The response arrived but did not decode.
    #[error("failed to decode response: {0}")]
    Decode(#[from] DecodeError),
}

struct Conn {
    stream: TcpStream,
    waiter: Waiter,
}

/// A query session against one server.
///
/// Every `last_*` accessor reflects the most recent successfully decoded
/// exchange; any failure clears them (a decode failure keeps the raw
/// response for inspection). The session requires `&mut self` for every
/// exchange — concurrent callers must hold their own sessions or
/// serialize access themselves.
pub struct Session {
    server: String,
    port: u16,
    conn: Option<Conn>,
    config: SessionConfig,
    last_raw: Vec<u8>,
    last_point: String,
    last_bat: Bat,
    last_value: f64,
    last_units: String,
    last_ok: String,
}

impl Session {
    /// Connects to `server:port` with the default configuration.
    ///
    /// # Errors
    ///
    /// One [`ConnectError`] kind per failed establishment step.
    pub fn connect(server: &str, port: u16) -> Result<Self, ConnectError> {
        Self::connect_with(server, port, SessionConfig::default())
    }

    /// Connects with an explicit configuration.
    ///
    /// # Errors
    ///
    /// One [`ConnectError`] kind per failed establishment step.
    pub fn connect_with(
        server: &str,
        port: u16,
        config: SessionConfig,
    ) -> Result<Self, ConnectError> {
        let mut stream = connector::open(server, port)?;
        let waiter = Waiter::new().map_err(ConnectError::Register)?;
        waiter
            .register(&mut stream)
            .map_err(ConnectError::Register)?;
        debug!("session open to {server}:{port}");

        Ok(Self {
            server: server.to_owned(),
            port,
            conn: Some(Conn { stream, waiter }),
            config,
            last_raw: Vec::with_capacity(RESPONSE_CAPACITY),
            last_point: String::new(),
            last_bat: Bat::default(),
            last_value: 0.0,
            last_units: String::new(),
            last_ok: String::new(),
        })
    }

    /// One request/response cycle: write, bounded wait, single read.
    ///
    /// The response is retained in [`last_raw`](Self::last_raw) and
    /// truncated at [`RESPONSE_CAPACITY`]. Returns
    /// [`ExchangeError::NotConnected`] without touching any socket when
    /// the session is closed. On failure every `last_*` field clears.
    ///
    /// # Errors
    ///
    /// See [`ExchangeError`]; this method reports the transport kinds.
    pub fn exchange(&mut self, request: &[u8]) -> Result<&[u8], ExchangeError> {
        match self.exchange_inner(request) {
            Ok(()) => Ok(&self.last_raw),
            Err(e) => {
                self.clear_last();
                Err(e)
            }
        }
    }

    fn exchange_inner(&mut self, request: &[u8]) -> Result<(), ExchangeError> {
        let conn = self.conn.as_mut().ok_or(ExchangeError::NotConnected)?;

        conn.stream.write_all(request).map_err(ExchangeError::Send)?;

        match conn.waiter.await_readable(self.config.response_timeout)? {
            Readiness::Ready => {}
            Readiness::TimedOut => return Err(ExchangeError::Timeout),
        }

        let mut buf = [0u8; RESPONSE_CAPACITY];
        let got = conn.stream.read(&mut buf).map_err(ExchangeError::Recv)?;
        self.last_raw.clear();
        self.last_raw.extend_from_slice(&buf[..got]);
        Ok(())
    }

    /// Sends `request` verbatim and returns the raw response bytes.
    ///
    /// The caller supplies the complete command text, trailing newline
    /// included. Raw mode decodes nothing, so previously decoded fields
    /// clear.
    ///
    /// # Errors
    ///
    /// Transport kinds of [`ExchangeError`].
    pub fn raw(&mut self, request: &[u8]) -> Result<&[u8], ExchangeError> {
        self.exchange(request)?;
        self.reset_decoded();
        Ok(&self.last_raw)
    }

    /// Queries the most recent value of `point`.
    ///
    /// On success the reading is retained in the `last_*` fields; `poll`
    /// responses carry no units or ok token, so those two clear. A decode
    /// failure clears the decoded fields but keeps the raw response.
    ///
    /// # Errors
    ///
    /// See [`ExchangeError`].
    pub fn poll(&mut self, point: &str) -> Result<Reading, ExchangeError> {
        let request = wire::encode_poll(point)?;
        self.exchange(request.as_bytes())?;
        match wire::decode_poll(&self.last_raw, self.config.value_parsing) {
            Ok(reading) => {
                self.store_reading(&reading.point, reading.bat, reading.value, "", "");
                Ok(reading)
            }
            Err(e) => {
                self.reset_decoded();
                Err(e.into())
            }
        }
    }

    /// Queries `point` with units and the server's range-check token.
    ///
    /// # Errors
    ///
    /// See [`ExchangeError`].
    pub fn poll2(&mut self, point: &str) -> Result<DetailedReading, ExchangeError> {
        let request = wire::encode_poll2(point)?;
        self.exchange(request.as_bytes())?;
        match wire::decode_poll2(&self.last_raw, self.config.value_parsing) {
            Ok(reading) => {
                self.store_reading(
                    &reading.point,
                    reading.bat,
                    reading.value,
                    &reading.units,
                    &reading.ok,
                );
                Ok(reading)
            }
            Err(e) => {
                self.reset_decoded();
                Err(e.into())
            }
        }
    }

    /// Requests every record of `point` newer than `since`, returning the
    /// raw multi-record text.
    ///
    /// The response is not decoded and, like any other, is truncated at
    /// [`RESPONSE_CAPACITY`] — large histories need repeated narrower
    /// queries.
    ///
    /// # Errors
    ///
    /// Transport kinds of [`ExchangeError`].
    pub fn since(&mut self, point: &str, since: Bat) -> Result<&[u8], ExchangeError> {
        let request = wire::encode_since(point, since)?;
        self.exchange(request.as_bytes())?;
        self.reset_decoded();
        Ok(&self.last_raw)
    }

    /// Closes the connection and clears all `last_*` fields.
    ///
    /// Idempotent, and callable in either state. The socket is released
    /// exactly once (the handle is moved out here and dropped); the
    /// poller deregistration is best-effort.
    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if conn.waiter.deregister(&mut conn.stream).is_err() {
                debug!("deregister on close failed");
            }
            debug!("session to {}:{} closed", self.server, self.port);
        }
        self.clear_last();
    }

    /// Server name this session was opened against.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Server port this session was opened against.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the session holds an open socket.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Configuration fixed at connect time.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Raw bytes of the most recent response.
    #[must_use]
    pub fn last_raw(&self) -> &[u8] {
        &self.last_raw
    }

    /// Point name from the most recent decoded exchange.
    #[must_use]
    pub fn last_point(&self) -> &str {
        &self.last_point
    }

    /// Timestamp from the most recent decoded exchange.
    #[must_use]
    pub fn last_bat(&self) -> Bat {
        self.last_bat
    }

    /// Value from the most recent decoded exchange.
    #[must_use]
    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    /// Units from the most recent `poll2` exchange.
    #[must_use]
    pub fn last_units(&self) -> &str {
        &self.last_units
    }

    /// Range-check token from the most recent `poll2` exchange.
    #[must_use]
    pub fn last_ok(&self) -> &str {
        &self.last_ok
    }

    fn store_reading(&mut self, point: &str, bat: Bat, value: f64, units: &str, ok: &str) {
        self.last_point.clear();
        self.last_point.push_str(point);
        self.last_bat = bat;
        self.last_value = value;
        self.last_units.clear();
        self.last_units.push_str(units);
        self.last_ok.clear();
        self.last_ok.push_str(ok);
    }

    /// Clears the fields a decoder fills, keeping the raw response.
    fn reset_decoded(&mut self) {
        self.last_point.clear();
        self.last_bat = Bat::default();
        self.last_value = 0.0;
        self.last_units.clear();
        self.last_ok.clear();
    }

    fn clear_last(&mut self) {
        self.last_raw.clear();
        self.reset_decoded();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn local_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        (listener, port)
    }

    #[test]
    fn default_config_matches_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.response_timeout, DEFAULT_RESPONSE_TIMEOUT);
        assert_eq!(config.value_parsing, ValueParsing::Strict);
    }

    #[test]
    fn closed_session_refuses_exchanges_without_io() {
        let (_listener, port) = local_listener();
        let mut session = Session::connect("127.0.0.1", port).expect("connect");
        session.close();
        assert!(!session.is_connected());

        assert!(matches!(
            session.poll("any.point"),
            Err(ExchangeError::NotConnected)
        ));
        assert!(matches!(
            session.exchange(b"poll\n1\nany.point\n"),
            Err(ExchangeError::NotConnected)
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let (_listener, port) = local_listener();
        let mut session = Session::connect("127.0.0.1", port).expect("connect");
        session.close();
        session.close();
        assert!(!session.is_connected());
    }

    #[test]
    fn connect_failure_surfaces_the_connector_error() {
        let (listener, port) = local_listener();
        drop(listener);
        assert!(matches!(
            Session::connect("127.0.0.1", port),
            Err(ConnectError::Connect(_))
        ));
    }
}

//! Synchronous client for tab-delimited telemetry point servers.
//!
//! The server exposes named "points" — scalar measurements stamped with a
//! 64-bit microsecond timestamp and, optionally, units and a range-check
//! token — over a line-oriented TCP protocol. This crate speaks that
//! protocol: one [`Session`] per socket, bounded wait-for-response
//! polling on a non-blocking stream, and a timestamp codec for the
//! atomic-time epoch the server stamps readings with.
//!
//! # Example
//!
//! ```no_run
//! use monpoint::Session;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::connect("monhost.example.org", 8051)?;
//!
//! let reading = session.poll2("site.environment.weather.Temperature")?;
//! println!("{} = {} {}", reading.point, reading.value, reading.units);
//!
//! // The server's own clock offset point supplies the leap-second
//! // correction for calendar conversion.
//! let dutc = session.poll("caclock.misc.clock.dUTC")?.value as i32;
//! println!("sampled at {}", reading.bat.to_human(dutc, 0)?);
//!
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod net;
pub mod session;
pub mod time;
pub mod wire;

mod trace;

pub use net::connector::ConnectError;
pub use net::waiter::{Readiness, WaitError, Waiter};
pub use session::{ExchangeError, Session, SessionConfig, DEFAULT_RESPONSE_TIMEOUT};
pub use time::{Bat, ConvertError, HumanTime};
pub use trace::init_tracing;
pub use wire::{
    DecodeError, DetailedReading, EncodeError, Reading, ValueParsing, RESPONSE_CAPACITY,
};

//! Session transport: connection establishment and bounded readiness
//! waits over a non-blocking TCP stream.

pub mod connector;
pub mod waiter;

pub use connector::{open, ConnectError};
pub use waiter::{Readiness, WaitError, Waiter};

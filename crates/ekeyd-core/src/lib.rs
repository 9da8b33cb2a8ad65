//! The connection and rekey state machines, and the OS-facing traits they
//! depend on.
//!
//! Both state machines follow the action pattern: stepping them never
//! performs I/O directly, it returns a list of actions ([`connection::ConnectionAction`]
//! or [`rekey::RekeyAction`]) for a driver to carry out. This keeps the
//! protocol logic testable with an in-memory [`env::Platform`] and free of
//! any dependency on sockets, ttys, or the kernel entropy ioctl.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod rekey;
pub mod stats;
pub mod telemetry;

pub use connection::{Connection, ConnectionAction, ConnectionState, KeyLookup};
pub use env::Platform;
pub use rekey::{RekeyAction, RekeyError, RekeyHandshake};
pub use stats::ConnectionStats;
pub use telemetry::{ShannonReport, Telemetry};

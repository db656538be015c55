//! # Connection Core
//!
//! The pieces every transport and the hub layer build on.
//!
//! ## Core Components:
//!
//! - **`state`**: the four-state connection machine and its atomic
//!   compare-and-set cell. Concurrent reconnect and stop paths race on it, and
//!   exactly one of them wins each transition.
//!
//! - **`line_buffer`**: reassembles newline-delimited records from streamed
//!   byte chunks.
//!
//! - **`connection`**: the application handle. Negotiation, lifecycle, send,
//!   the message cursor and group set, and notification fan-out.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The connection state machine.
pub mod state;
/// Byte-chunk to line reassembly.
pub mod line_buffer;
/// The application-facing connection handle.
pub mod connection;

// --- Public API Re-exports ---
pub use connection::{Connection, ConnectionEvent, WeakConnection};
pub use line_buffer::LineBuffer;
pub use state::{AtomicConnectionState, ConnectionState, StateChange};

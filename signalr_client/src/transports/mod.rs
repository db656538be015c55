//! # Transports
//!
//! A transport carries the persistent message channel over plain HTTP. Each
//! one implements [`ClientTransport`] and owns its own in-flight request and
//! timers; the connection only ever talks to the one that started.
//!
//! ## Contained Modules:
//!
//! - **`protocol`**: negotiate, url construction, envelope parsing, send and
//!   the abort handshake, shared by every transport.
//! - **`long_polling`**: one POST per poll, with backoff and reconnect timing.
//! - **`event_source`**: turns a streamed body into `id:` / `data:` records.
//! - **`server_sent_events`**: one long-lived streamed request, reopened when
//!   it drops.
//! - **`auto`**: tries transports in priority order and commits to the first
//!   that starts.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use futures_util::future::BoxFuture;

use crate::core::connection::Connection;
use crate::errors::ClientError;

pub mod auto;
pub mod event_source;
pub mod long_polling;
pub mod protocol;
pub mod server_sent_events;

pub use auto::AutoTransport;
pub use long_polling::LongPollingTransport;
pub use server_sent_events::ServerSentEventsTransport;

/// The capability every transport provides.
pub trait ClientTransport: Send + Sync {
    /// The wire name sent as the `transport` query value.
    fn name(&self) -> &'static str;

    /// Completes once the first connect succeeded, or fails with the first
    /// connect's fault. `data` is the opaque connection data for receive urls.
    fn start<'a>(
        &'a self,
        connection: &'a Connection,
        data: Option<String>,
    ) -> BoxFuture<'a, Result<(), ClientError>>;

    /// Sends one payload and returns the raw response body, if any.
    fn send<'a>(
        &'a self,
        connection: &'a Connection,
        data: String,
    ) -> BoxFuture<'a, Result<Option<String>, ClientError>>;

    /// Aborts in-flight I/O and invalidates any pending retry.
    fn stop<'a>(&'a self, connection: &'a Connection) -> BoxFuture<'a, ()>;
}

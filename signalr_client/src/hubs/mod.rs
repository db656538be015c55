//! # Hubs
//!
//! Named logical endpoints multiplexed over one connection.
//!
//! ## Contained Modules:
//!
//! - **`invocation`**: the inbound and outbound hub envelopes.
//! - **`proxy`**: per-hub state and event handlers, plus `invoke`.
//! - **`hub_connection`**: routes inbound invocations to proxies and
//!   announces the proxied hubs at start.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod hub_connection;
pub mod invocation;
pub mod proxy;

pub use hub_connection::HubConnection;
pub use invocation::{HubInvocation, HubRegistration, HubServerInvocation};
pub use proxy::{HubProxy, Subscription};

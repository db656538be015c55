//! # signalr_client
//!
//! A client for persistent, real-time connections over plain HTTP. The
//! connection negotiates with the server, then carries messages over
//! server-sent events, falling back to long polling when streaming is not
//! available. Dropped channels are reopened and resumed from the server's
//! message cursor. Hubs add named remote-method invocation on top.
//!
//! ```no_run
//! use signalr_client::{ClientConfig, HubConnection};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), signalr_client::ClientError> {
//! let hubs = HubConnection::from_url("http://localhost:8080", true, ClientConfig::default())?;
//! let chat = hubs.create_proxy("chat");
//! chat.on_typed("addMessage", |text: String| println!("{}", text));
//!
//! hubs.start().await?;
//! chat.invoke::<()>("send", vec![json!("hello")]).await?;
//! hubs.stop().await;
//! # Ok(())
//! # }
//! ```

// Declare the modules
pub mod configs;
pub mod core;
pub mod errors;
pub mod http;
pub mod hubs;
pub mod transports;

#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the everyday surface
pub use configs::config_client::{ClientConfig, ConfigError};
pub use crate::core::{Connection, ConnectionEvent, ConnectionState, StateChange};
pub use errors::ClientError;
pub use http::{HttpClient, HttpError, HttpRequest, HttpResponse};
pub use hubs::{HubConnection, HubProxy, Subscription};
pub use transports::{AutoTransport, ClientTransport, LongPollingTransport, ServerSentEventsTransport};

#[cfg(feature = "reqwest-client")]
pub use http::ReqwestHttpClient;

#[cfg(feature = "loggers")]
pub use loggers::logger::setup_logging;

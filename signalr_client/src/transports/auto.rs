//! # Transport Selector
//!
//! Tries each candidate in priority order and commits to the first whose
//! start succeeds. A candidate that failed is never called again. Send and
//! stop reach the committed transport only.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::core::connection::Connection;
use crate::core::state::ConnectionState;
use crate::errors::ClientError;
use crate::transports::long_polling::LongPollingTransport;
use crate::transports::server_sent_events::ServerSentEventsTransport;
use crate::transports::ClientTransport;

pub struct AutoTransport {
    transports: Vec<Arc<dyn ClientTransport>>,
    /// The candidate being started, then the committed transport.
    active: Mutex<Option<Arc<dyn ClientTransport>>>,
}

impl Default for AutoTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoTransport {
    /// Server-sent events first, long polling second.
    pub fn new() -> Self {
        Self::with_transports(vec![
            Arc::new(ServerSentEventsTransport::new()),
            Arc::new(LongPollingTransport::new()),
        ])
    }

    pub fn with_transports(transports: Vec<Arc<dyn ClientTransport>>) -> Self {
        Self {
            transports,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<Arc<dyn ClientTransport>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the committed transport.
    pub fn active_name(&self) -> Option<&'static str> {
        self.active().as_ref().map(|t| t.name())
    }
}

impl ClientTransport for AutoTransport {
    fn name(&self) -> &'static str {
        self.active_name().unwrap_or("auto")
    }

    fn start<'a>(
        &'a self,
        connection: &'a Connection,
        data: Option<String>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        async move {
            for transport in &self.transports {
                if connection.state() == ConnectionState::Disconnected {
                    return Err(ClientError::Aborted);
                }

                *self.active() = Some(Arc::clone(transport));
                // Candidates re-check the state before their first request
                match transport.start(connection, data.clone()).await {
                    Ok(()) => {
                        log::info!("Transport {} started for {}", transport.name(), connection.url());
                        return Ok(());
                    }
                    Err(e) => {
                        self.active().take();
                        if e.is_aborted() {
                            return Err(e);
                        }
                        log::warn!(
                            "Transport {} failed to start for {}: {}",
                            transport.name(),
                            connection.url(),
                            e
                        );
                    }
                }
            }

            Err(ClientError::Unsupported)
        }
        .boxed()
    }

    fn send<'a>(
        &'a self,
        connection: &'a Connection,
        data: String,
    ) -> BoxFuture<'a, Result<Option<String>, ClientError>> {
        let active = self.active().clone();
        async move {
            match active {
                Some(transport) => transport.send(connection, data).await,
                None => Err(ClientError::InvalidState {
                    expected: ConnectionState::Connected,
                    actual: connection.state(),
                }),
            }
        }
        .boxed()
    }

    fn stop<'a>(&'a self, connection: &'a Connection) -> BoxFuture<'a, ()> {
        let active = self.active().take();
        async move {
            if let Some(transport) = active {
                transport.stop(connection).await;
            }
        }
        .boxed()
    }
}

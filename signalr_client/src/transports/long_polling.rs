//! # Long-Polling Transport
//!
//! One POST per poll, issued back to back by a single task. The first poll
//! uses the `connect` url and decides the outcome of `start`: success starts
//! the loop, a fault fails the start and is never retried. Later faults move
//! the connection to `Reconnecting` and keep polling, after a backoff unless
//! the fault was a benign stream close.
//!
//! Polling ends when the transport is stopped or the connection leaves the
//! active states, whichever is observed first.
//!
//! A reconnect is announced once per drop, whichever comes first: the next
//! poll answering, or `ReconnectDelay` elapsing with that poll still held
//! open by the server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::connection::Connection;
use crate::core::state::ConnectionState;
use crate::errors::ClientError;
use crate::http::{abortable, HttpError, HttpRequest};
use crate::transports::protocol::{self, InFlightRequest, LONG_POLLING};
use crate::transports::ClientTransport;

#[derive(Debug, Default)]
pub struct LongPollingTransport {
    in_flight: Arc<InFlightRequest>,
    /// Cancelled on stop; every poll, backoff and reconnect timer hangs off it.
    lifetime: Mutex<Option<CancellationToken>>,
}

impl LongPollingTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientTransport for LongPollingTransport {
    fn name(&self) -> &'static str {
        LONG_POLLING
    }

    fn start<'a>(
        &'a self,
        connection: &'a Connection,
        data: Option<String>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        async move {
            let lifetime = CancellationToken::new();
            let previous = self
                .lifetime
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(lifetime.clone());
            if let Some(previous) = previous {
                previous.cancel();
            }

            let (init_tx, init_rx) = oneshot::channel();
            let poller = Poller {
                connection: connection.clone(),
                data,
                in_flight: Arc::clone(&self.in_flight),
                lifetime,
                init: Some(init_tx),
                raise_reconnect: false,
                reconnect_fired: Arc::new(AtomicBool::new(false)),
                reconnect_timer: None,
            };
            tokio::spawn(poller.run());

            init_rx.await.unwrap_or(Err(ClientError::Aborted))
        }
        .boxed()
    }

    fn send<'a>(
        &'a self,
        connection: &'a Connection,
        data: String,
    ) -> BoxFuture<'a, Result<Option<String>, ClientError>> {
        protocol::send(connection, LONG_POLLING, data).boxed()
    }

    fn stop<'a>(&'a self, connection: &'a Connection) -> BoxFuture<'a, ()> {
        async move {
            protocol::abort(connection, LONG_POLLING, &self.in_flight).await;
            let lifetime = self
                .lifetime
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(lifetime) = lifetime {
                lifetime.cancel();
            }
        }
        .boxed()
    }
}

/// Moves `Reconnecting -> Connected` and announces it, at most once per guard.
fn fire_reconnected(connection: &Connection, fired: &AtomicBool) {
    if fired.swap(true, Ordering::AcqRel) {
        return;
    }
    if connection.change_state(ConnectionState::Reconnecting, ConnectionState::Connected) {
        connection.dispatch_reconnected();
    }
}

struct Poller {
    connection: Connection,
    data: Option<String>,
    in_flight: Arc<InFlightRequest>,
    lifetime: CancellationToken,
    /// Present until the first poll completes.
    init: Option<oneshot::Sender<Result<(), ClientError>>>,
    /// Set after a fault; the next poll announces the reconnect.
    raise_reconnect: bool,
    /// One guard per drop.
    reconnect_fired: Arc<AtomicBool>,
    reconnect_timer: Option<CancellationToken>,
}

impl Poller {
    fn poll_url(&self) -> String {
        let base = if self.connection.message_id().is_none() {
            format!("{}connect", self.connection.url())
        } else {
            self.connection.url().to_string()
        };
        let query =
            protocol::receive_query_string(LONG_POLLING, &self.connection, self.data.as_deref(), true);
        format!("{}{}", base, query)
    }

    fn resolve_init(&mut self, result: Result<(), ClientError>) {
        if let Some(init) = self.init.take() {
            let _ = init.send(result);
        }
    }

    async fn run(mut self) {
        while !self.lifetime.is_cancelled() && self.connection.is_active() {
            let url = self.poll_url();
            if self.raise_reconnect {
                self.schedule_reconnect();
            }

            let request = self.in_flight.begin(&self.lifetime);
            let http = self.connection.http();
            log::debug!("LP: POST {}", url);
            let result = abortable(&request, async move {
                http.post(HttpRequest::new(url), Vec::new())
                    .await?
                    .read_as_string()
                    .await
            })
            .await;
            self.in_flight.finish();

            match result {
                Ok(body) => {
                    if self.raise_reconnect {
                        self.raise_reconnect = false;
                        self.cancel_reconnect_timer();
                        fire_reconnected(&self.connection, &self.reconnect_fired);
                    }
                    if self.init.is_some() {
                        // Promote before the next poll can fault
                        self.connection
                            .change_state(ConnectionState::Connecting, ConnectionState::Connected);
                        self.resolve_init(Ok(()));
                    }

                    let outcome = protocol::process_response(&self.connection, &body).await;
                    if outcome.disconnected {
                        log::info!("Server requested disconnect of {}", self.connection.url());
                        self.connection.stop().await;
                        break;
                    }
                }
                Err(HttpError::Aborted) => {
                    self.resolve_init(Err(ClientError::Aborted));
                    break;
                }
                Err(e) if self.init.is_some() => {
                    log::error!("LP: initial poll to {} failed: {}", self.connection.url(), e);
                    self.resolve_init(Err(ClientError::Network(e)));
                    break;
                }
                Err(e) => self.on_fault(e).await,
            }
        }

        // Stopped before the first poll completed
        self.resolve_init(Err(ClientError::Aborted));
        self.cancel_reconnect_timer();
        log::debug!("LP: polling loop for {} ended", self.connection.url());
    }

    async fn on_fault(&mut self, error: HttpError) {
        if self
            .connection
            .change_state(ConnectionState::Connected, ConnectionState::Reconnecting)
        {
            self.reconnect_fired = Arc::new(AtomicBool::new(false));
        }
        self.cancel_reconnect_timer();
        self.raise_reconnect = true;

        if error.is_benign() {
            log::debug!("LP: {}", error);
            return;
        }

        self.connection.dispatch_error(&ClientError::Network(error));

        if self.connection.is_active() {
            tokio::select! {
                _ = self.lifetime.cancelled() => {}
                _ = tokio::time::sleep(self.connection.config().error_backoff()) => {}
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect_timer();
        let timer = self.lifetime.child_token();
        self.reconnect_timer = Some(timer.clone());

        let connection = self.connection.clone();
        let fired = Arc::clone(&self.reconnect_fired);
        let delay = connection.config().long_polling_reconnect_delay();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => fire_reconnected(&connection, &fired),
            }
        });
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }
}

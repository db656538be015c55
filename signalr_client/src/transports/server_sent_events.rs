//! # Server-Sent Events Transport
//!
//! A single long-lived request whose body is read as event-source records.
//!
//! ## Open:
//! The initial open targets `{url}connect`; reopens use the base url. When
//! the group set is larger than the configured threshold the request becomes
//! a POST carrying `groups` as a form field, otherwise it is a GET with the
//! groups in the query.
//!
//! The initial open is resolved exactly once by whichever comes first: the
//! `data: initialized` sentinel, a fault, or the connection-timeout timer.
//! A timeout aborts the attempt.
//!
//! ## Close:
//! When the stream ends the response is dropped. Unless the close came from
//! a local stop or the server asked to disconnect, the transport waits
//! `ReconnectDelay` and reopens, provided the connection can move to (or is
//! already in) `Reconnecting`.

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
use crate::transports::event_source::{EventSourceReader, SseRecordKind};
use crate::transports::protocol::{self, InFlightRequest, SERVER_SENT_EVENTS};
use crate::transports::ClientTransport;

#[derive(Debug, Default)]
pub struct ServerSentEventsTransport {
    in_flight: Arc<InFlightRequest>,
    lifetime: Mutex<Option<CancellationToken>>,
}

impl ServerSentEventsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientTransport for ServerSentEventsTransport {
    fn name(&self) -> &'static str {
        SERVER_SENT_EVENTS
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
            let session = StreamSession {
                connection: connection.clone(),
                data,
                in_flight: Arc::clone(&self.in_flight),
                lifetime,
                gate: Arc::new(InitGate::new(init_tx)),
            };
            tokio::spawn(session.run());

            init_rx.await.unwrap_or(Err(ClientError::Aborted))
        }
        .boxed()
    }

    fn send<'a>(
        &'a self,
        connection: &'a Connection,
        data: String,
    ) -> BoxFuture<'a, Result<Option<String>, ClientError>> {
        protocol::send(connection, SERVER_SENT_EVENTS, data).boxed()
    }

    fn stop<'a>(&'a self, connection: &'a Connection) -> BoxFuture<'a, ()> {
        async move {
            protocol::abort(connection, SERVER_SENT_EVENTS, &self.in_flight).await;
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

/// Resolves the initial open once. Shared by the response handler and the
/// connection-timeout timer.
struct InitGate {
    resolved: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Result<(), ClientError>>>>,
}

impl InitGate {
    fn new(sender: oneshot::Sender<Result<(), ClientError>>) -> Self {
        Self {
            resolved: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// True if this call won.
    fn resolve(&self, result: Result<(), ClientError>) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
        true
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

struct StreamSession {
    connection: Connection,
    data: Option<String>,
    in_flight: Arc<InFlightRequest>,
    lifetime: CancellationToken,
    gate: Arc<InitGate>,
}

impl StreamSession {
    async fn run(self) {
        let mut reconnecting = false;

        while self.open(reconnecting).await {
            tokio::select! {
                _ = self.lifetime.cancelled() => break,
                _ = tokio::time::sleep(self.connection.config().sse_reconnect_delay()) => {}
            }

            let may_reconnect = self.connection.state() == ConnectionState::Reconnecting
                || self
                    .connection
                    .change_state(ConnectionState::Connected, ConnectionState::Reconnecting);
            if !may_reconnect {
                break;
            }
            reconnecting = true;
        }

        log::debug!("SSE: stream session for {} ended", self.connection.url());
    }

    fn arm_connect_timeout(&self, attempt: CancellationToken) {
        let gate = Arc::clone(&self.gate);
        let window = self.connection.config().sse_connection_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = attempt.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    if gate.resolve(Err(ClientError::Timeout)) {
                        log::warn!("SSE: no response within {:?}, abandoning connect", window);
                        attempt.cancel();
                    }
                }
            }
        });
    }

    /// Runs one open-read-close cycle. Returns true when a reconnect should
    /// be scheduled.
    async fn open(&self, reconnecting: bool) -> bool {
        let connection = &self.connection;
        if self.lifetime.is_cancelled() || !connection.is_active() {
            self.gate.resolve(Err(ClientError::Aborted));
            return false;
        }

        let groups = connection.groups();
        let post_groups = groups.len() > connection.config().groups_post_threshold;

        let mut url = connection.url().to_string();
        if !reconnecting {
            url.push_str("connect");
        }
        url.push_str(&protocol::receive_query_string(
            SERVER_SENT_EVENTS,
            connection,
            self.data.as_deref(),
            !post_groups,
        ));

        let request = HttpRequest::new(url).accept("text/event-stream");
        let http = connection.http();
        let pending = if post_groups {
            log::debug!("SSE: POST {}", request.url);
            let form = vec![(
                "groups".to_string(),
                serde_json::to_string(&groups).unwrap_or_default(),
            )];
            http.post(request, form)
        } else {
            log::debug!("SSE: GET {}", request.url);
            http.get(request)
        };

        let attempt = self.in_flight.begin(&self.lifetime);
        if !reconnecting {
            self.arm_connect_timeout(attempt.clone());
        }

        let response = match abortable(&attempt, pending).await {
            Ok(response) => response,
            Err(e) => {
                self.in_flight.finish();
                return self.on_open_fault(e, reconnecting);
            }
        };

        let mut reader = EventSourceReader::new(response.into_stream());
        let initialized = AtomicBool::new(false);
        let mut retry = true;

        let closed_by = loop {
            let record = match abortable(&attempt, reader.next_record()).await {
                Ok(Some(record)) => record,
                Ok(None) => break None,
                Err(e) => break Some(e),
            };

            match record.kind {
                SseRecordKind::Id => connection.set_message_id(record.value),
                SseRecordKind::Data if record.value.eq_ignore_ascii_case("initialized") => {
                    if initialized.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    if !reconnecting {
                        self.gate.resolve(Ok(()));
                    } else if connection
                        .change_state(ConnectionState::Reconnecting, ConnectionState::Connected)
                    {
                        connection.dispatch_reconnected();
                    }
                }
                SseRecordKind::Data => {
                    let outcome = protocol::process_response(connection, &record.value).await;
                    if outcome.disconnected {
                        log::info!("Server requested disconnect of {}", connection.url());
                        retry = false;
                    }
                }
            }
        };

        drop(reader);
        self.in_flight.finish();
        attempt.cancel();

        if matches!(&closed_by, Some(e) if e.is_aborted()) {
            self.gate.resolve(Err(ClientError::Aborted));
            return false;
        }

        if !reconnecting && !self.gate.is_resolved() {
            let error = closed_by.unwrap_or_else(|| {
                HttpError::StreamClosed("stream ended before initialization".to_string())
            });
            self.gate.resolve(Err(ClientError::Network(error)));
            return false;
        }

        match closed_by {
            Some(e) if e.is_benign() => log::debug!("SSE: {}", e),
            Some(e) => connection.dispatch_error(&ClientError::Network(e)),
            None => log::debug!("SSE: stream closed by server"),
        }

        if !retry {
            connection.stop().await;
            return false;
        }

        !self.lifetime.is_cancelled()
    }

    fn on_open_fault(&self, error: HttpError, reconnecting: bool) -> bool {
        if error.is_aborted() {
            self.gate.resolve(Err(ClientError::Aborted));
            return false;
        }

        if !reconnecting {
            log::error!("SSE: connect to {} failed: {}", self.connection.url(), error);
            self.gate.resolve(Err(ClientError::Network(error)));
            return false;
        }

        self.connection.dispatch_error(&ClientError::Network(error));
        !self.lifetime.is_cancelled()
    }
}

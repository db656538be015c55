//! # Connection
//!
//! The application-facing handle. A `Connection` owns the url, the
//! negotiated identity, the message cursor, the group set and the state
//! machine. It hands the wire work to whichever [`ClientTransport`] wins
//! selection at start.
//!
//! ## Lifecycle:
//! 1. `start` moves `Disconnected -> Connecting`, negotiates, checks the
//!    protocol version (1.0 only) and starts the transport.
//! 2. Once the transport reports its first successful connect the state
//!    becomes `Connected`.
//! 3. Transports move `Connected <-> Reconnecting` on drops and recoveries.
//! 4. `stop` aborts the transport, fires the closed notification and leaves
//!    the connection `Disconnected`. It is idempotent.
//!
//! ## Notifications:
//! Callbacks are registered with `on_received`, `on_error`, `on_reconnected`,
//! `on_closed` and `on_state_changed`. They may run on any runtime worker.
//! `events()` returns the same stream as a channel.
//!
//! A handle is cheap to clone; every clone refers to the same connection.
//! Call `stop` before dropping the last handle, since running transport tasks
//! keep the connection alive.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::configs::config_client::ClientConfig;
use crate::core::state::{AtomicConnectionState, ConnectionState, StateChange};
use crate::errors::ClientError;
use crate::http::HttpClient;
use crate::transports::auto::AutoTransport;
use crate::transports::protocol;
use crate::transports::ClientTransport;

type ReceivedHandler = Arc<dyn Fn(&Value) -> Result<(), ClientError> + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;
type SignalHandler = Arc<dyn Fn() + Send + Sync>;
type StateHandler = Arc<dyn Fn(StateChange) + Send + Sync>;
type SendingHook = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// A notification, as delivered through [`Connection::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Received(Value),
    Error(String),
    Reconnected,
    Closed,
    StateChanged(StateChange),
}

#[derive(Default)]
struct Handlers {
    received: Vec<ReceivedHandler>,
    error: Vec<ErrorHandler>,
    reconnected: Vec<SignalHandler>,
    closed: Vec<SignalHandler>,
    state_changed: Vec<StateHandler>,
    events: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

/// Fields written by transport continuations. Guarded by one lock so a late
/// abort cannot interleave with a fresh read.
#[derive(Debug, Default)]
struct SharedState {
    connection_id: Option<String>,
    negotiated_url: Option<String>,
    message_id: Option<String>,
    groups: Vec<String>,
}

struct ConnectionInner {
    url: String,
    query_string: Option<String>,
    state: AtomicConnectionState,
    shared: Mutex<SharedState>,
    transport: Mutex<Option<Arc<dyn ClientTransport>>>,
    handlers: RwLock<Handlers>,
    sending: RwLock<Option<SendingHook>>,
    http: Arc<dyn HttpClient>,
    config: ClientConfig,
    /// Serializes envelope processing so cursor and groups advance in order.
    receive_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// A non-owning handle, used by hub proxies to reach their connection
/// without keeping it alive.
#[derive(Clone, Default)]
pub struct WeakConnection(Weak<ConnectionInner>);

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection with default configuration.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidUrl`] if `url` embeds a query string.
    pub fn new(url: &str, http: Arc<dyn HttpClient>) -> Result<Self, ClientError> {
        Self::with_options(url, None, http, ClientConfig::default())
    }

    /// Creates a connection whose requests carry `k=v&k=v` custom query data.
    pub fn with_query(
        url: &str,
        query: &[(&str, &str)],
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, ClientError> {
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        Self::with_options(url, Some(query_string), http, ClientConfig::default())
    }

    pub fn with_options(
        url: &str,
        query_string: Option<String>,
        http: Arc<dyn HttpClient>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        if url.contains('?') {
            return Err(ClientError::InvalidUrl(format!(
                "Url cannot contain a query string directly, pass query values separately: {}",
                url
            )));
        }

        let url = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{}/", url)
        };

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                url,
                query_string: query_string.filter(|q| !q.is_empty()),
                state: AtomicConnectionState::default(),
                shared: Mutex::new(SharedState::default()),
                transport: Mutex::new(None),
                handlers: RwLock::new(Handlers::default()),
                sending: RwLock::new(None),
                http,
                config,
                receive_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Creates a connection backed by the default reqwest binding.
    #[cfg(feature = "reqwest-client")]
    pub fn from_url(url: &str, config: ClientConfig) -> Result<Self, ClientError> {
        let http = Arc::new(crate::http::ReqwestHttpClient::from_config(&config));
        Self::with_options(url, None, http, config)
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }

    // --- Accessors ---

    /// Base url, always ending in `/`.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn query_string(&self) -> Option<&str> {
        self.inner.query_string.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn http(&self) -> Arc<dyn HttpClient> {
        Arc::clone(&self.inner.http)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Not `Disconnected`.
    pub fn is_active(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    /// Assigned once negotiation succeeds.
    pub fn connection_id(&self) -> Option<String> {
        lock(&self.inner.shared).connection_id.clone()
    }

    /// The url the server reported during negotiation.
    pub fn negotiated_url(&self) -> Option<String> {
        lock(&self.inner.shared).negotiated_url.clone()
    }

    /// The message cursor, if the server has assigned one.
    pub fn message_id(&self) -> Option<String> {
        lock(&self.inner.shared).message_id.clone()
    }

    pub(crate) fn set_message_id(&self, message_id: String) {
        lock(&self.inner.shared).message_id = Some(message_id);
    }

    pub fn groups(&self) -> Vec<String> {
        lock(&self.inner.shared).groups.clone()
    }

    /// Replaces the group set wholesale.
    pub(crate) fn set_groups(&self, groups: Vec<String>) {
        lock(&self.inner.shared).groups = groups;
    }

    pub(crate) fn receive_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.inner.receive_lock
    }

    /// Compare-and-set on the state machine. On success every state-changed
    /// observer is notified.
    pub fn change_state(&self, old: ConnectionState, new: ConnectionState) -> bool {
        let changed = self.inner.state.change(old, new);
        if changed {
            log::info!("Connection {} state: {} -> {}", self.inner.url, old, new);
            self.dispatch_state_changed(StateChange { old, new });
        }
        changed
    }

    // --- Lifecycle ---

    /// Starts with the default transport chain: server-sent events first,
    /// then long polling.
    pub async fn start(&self) -> Result<(), ClientError> {
        let transport = Arc::new(AutoTransport::new());
        self.start_with(transport).await
    }

    /// Starts with an explicit transport. Does nothing if already started.
    ///
    /// # Errors
    /// Fails with [`ClientError::Protocol`] or
    /// [`ClientError::IncompatibleProtocol`] when negotiation is unusable, in
    /// which case no transport is started, or with the transport's own
    /// start error.
    pub async fn start_with(&self, transport: Arc<dyn ClientTransport>) -> Result<(), ClientError> {
        if !self.change_state(ConnectionState::Disconnected, ConnectionState::Connecting) {
            log::debug!("Start ignored, connection {} is already {}", self.url(), self.state());
            return Ok(());
        }

        *lock(&self.inner.shared) = SharedState::default();
        *lock(&self.inner.transport) = Some(Arc::clone(&transport));

        let outcome = self.establish(transport.as_ref()).await;

        match outcome {
            Ok(()) => {
                // A transport may already have promoted the state itself
                self.change_state(ConnectionState::Connecting, ConnectionState::Connected);
                if self.state() == ConnectionState::Disconnected {
                    // Stopped while the transport was coming up; stop found
                    // nothing to abort yet
                    transport.stop(self).await;
                    return Err(ClientError::Aborted);
                }
                log::info!("Connected to {} using {}", self.url(), transport.name());
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start connection to {}: {}", self.url(), e);
                lock(&self.inner.transport).take();
                if !self.change_state(ConnectionState::Connecting, ConnectionState::Disconnected) {
                    // A concurrent stop already closed the connection
                    transport.stop(self).await;
                }
                Err(e)
            }
        }
    }

    async fn establish(&self, transport: &dyn ClientTransport) -> Result<(), ClientError> {
        let negotiation = protocol::negotiate(self).await?;
        protocol::verify_protocol_version(&negotiation.protocol_version)?;

        {
            let mut shared = lock(&self.inner.shared);
            shared.connection_id = Some(negotiation.connection_id);
            shared.negotiated_url = Some(negotiation.url).filter(|u| !u.is_empty());
        }

        let data = self.sending_data();
        transport.start(self, data).await
    }

    /// Aborts the active transport and closes the connection. A no-op when
    /// never started or already stopped.
    pub async fn stop(&self) {
        let previous = self.inner.state.swap(ConnectionState::Disconnected);
        if previous == ConnectionState::Disconnected {
            return;
        }

        log::info!("Stopping connection to {}", self.url());
        self.dispatch_state_changed(StateChange {
            old: previous,
            new: ConnectionState::Disconnected,
        });

        let transport = lock(&self.inner.transport).take();
        if let Some(transport) = transport {
            transport.stop(self).await;
        }

        self.dispatch_closed();
    }

    /// Sends `data` and decodes the response body into `T`, or returns
    /// `T::default()` when the body is empty.
    ///
    /// # Errors
    /// [`ClientError::InvalidState`] unless the connection is `Connected`.
    pub async fn send<T>(&self, data: &str) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Default,
    {
        let raw = self.send_raw(data).await?;
        match raw {
            Some(body) if !body.trim().is_empty() => Ok(serde_json::from_str(&body)?),
            _ => Ok(T::default()),
        }
    }

    /// Sends `data` and returns the undecoded response body.
    pub async fn send_raw(&self, data: &str) -> Result<Option<String>, ClientError> {
        let actual = self.state();
        if actual != ConnectionState::Connected {
            return Err(ClientError::InvalidState {
                expected: ConnectionState::Connected,
                actual,
            });
        }

        let transport = lock(&self.inner.transport).clone();
        let transport = transport.ok_or(ClientError::InvalidState {
            expected: ConnectionState::Connected,
            actual: ConnectionState::Disconnected,
        })?;

        transport.send(self, data.to_string()).await
    }

    // --- Registration ---

    /// Supplies the `connectionData` sent with every receive request. Called
    /// once per start, after negotiation.
    pub fn set_sending<F>(&self, hook: F)
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        *self.inner.sending.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    fn sending_data(&self) -> Option<String> {
        let hook = self
            .inner
            .sending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        hook.and_then(|h| h())
    }

    fn handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.inner.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.inner.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a message handler. An `Err` is reported through the error
    /// notification; it never stops delivery of the rest of the batch.
    pub fn on_received<F>(&self, handler: F)
    where
        F: Fn(&Value) -> Result<(), ClientError> + Send + Sync + 'static,
    {
        self.handlers_mut().received.push(Arc::new(handler));
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.handlers_mut().error.push(Arc::new(handler));
    }

    pub fn on_reconnected<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers_mut().reconnected.push(Arc::new(handler));
    }

    pub fn on_closed<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers_mut().closed.push(Arc::new(handler));
    }

    pub fn on_state_changed<F>(&self, handler: F)
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.handlers_mut().state_changed.push(Arc::new(handler));
    }

    /// Every notification as a channel. The sender is dropped from the
    /// registry once the receiver goes away.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers_mut().events.push(tx);
        rx
    }

    // --- Dispatch ---

    fn publish(&self, event: ConnectionEvent) {
        let has_closed = {
            let handlers = self.handlers();
            let mut any_closed = false;
            for tx in &handlers.events {
                if tx.send(event.clone()).is_err() {
                    any_closed = true;
                }
            }
            any_closed
        };
        if has_closed {
            self.handlers_mut().events.retain(|tx| !tx.is_closed());
        }
    }

    /// Offers one message to every received handler, in registration order.
    /// Returns the first handler error after all handlers have run.
    pub(crate) fn dispatch_received(&self, message: &Value) -> Result<(), ClientError> {
        let handlers = self.handlers().received.clone();
        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler(message) {
                first_error.get_or_insert(e);
            }
        }
        self.publish(ConnectionEvent::Received(message.clone()));
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn dispatch_error(&self, error: &ClientError) {
        log::warn!("Connection {} error: {}", self.url(), error);
        let handlers = self.handlers().error.clone();
        for handler in handlers {
            handler(error);
        }
        self.publish(ConnectionEvent::Error(error.to_string()));
    }

    pub(crate) fn dispatch_reconnected(&self) {
        log::info!("Connection {} reconnected", self.url());
        let handlers = self.handlers().reconnected.clone();
        for handler in handlers {
            handler();
        }
        self.publish(ConnectionEvent::Reconnected);
    }

    fn dispatch_closed(&self) {
        let handlers = self.handlers().closed.clone();
        for handler in handlers {
            handler();
        }
        self.publish(ConnectionEvent::Closed);
    }

    fn dispatch_state_changed(&self, change: StateChange) {
        let handlers = self.handlers().state_changed.clone();
        for handler in handlers {
            handler(change);
        }
        self.publish(ConnectionEvent::StateChanged(change));
    }
}

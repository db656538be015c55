//! # Hub Proxy
//!
//! The client side of one named hub: a state map that round-trips with every
//! invocation, plus event handlers keyed by event name. Event names match
//! case-insensitively and handlers of one event run in registration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::connection::WeakConnection;
use crate::core::state::ConnectionState;
use crate::errors::ClientError;
use crate::hubs::invocation::HubServerInvocation;

type EventHandler = Arc<dyn Fn(&[Value]) -> Result<(), ClientError> + Send + Sync>;

struct ProxyInner {
    hub_name: String,
    connection: WeakConnection,
    state: Mutex<HashMap<String, Value>>,
    handlers: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct HubProxy {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for HubProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubProxy")
            .field("hub_name", &self.inner.hub_name)
            .finish_non_exhaustive()
    }
}

impl HubProxy {
    pub(crate) fn new(hub_name: &str, connection: WeakConnection) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                hub_name: hub_name.to_string(),
                connection,
                state: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn hub_name(&self) -> &str {
        &self.inner.hub_name
    }

    /// Calls `action` on the server hub with the current state snapshot and
    /// decodes the response body into `T`.
    ///
    /// # Errors
    /// [`ClientError::InvalidState`] if the connection is gone or not
    /// connected, plus any send or decode failure.
    pub async fn invoke<T>(&self, action: &str, args: Vec<Value>) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Default,
    {
        let connection = self.inner.connection.upgrade().ok_or(ClientError::InvalidState {
            expected: ConnectionState::Connected,
            actual: ConnectionState::Disconnected,
        })?;

        let invocation = HubServerInvocation {
            hub: self.inner.hub_name.clone(),
            action: action.to_string(),
            data: args,
            state: self.state(),
        };
        let payload = serde_json::to_string(&invocation)?;

        log::debug!("Invoking {}.{}", self.inner.hub_name, action);
        connection.send::<T>(&payload).await
    }

    /// A snapshot of the proxy state.
    pub fn state(&self) -> HashMap<String, Value> {
        lock(&self.inner.state).clone()
    }

    /// Reads one state entry, or `None` if missing or of another shape.
    pub fn get_value<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = lock(&self.inner.state).get(name).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn set_value<T: Serialize>(&self, name: &str, value: T) -> Result<(), ClientError> {
        let value = serde_json::to_value(value)?;
        lock(&self.inner.state).insert(name.to_string(), value);
        Ok(())
    }

    /// Overwrites each key of `patch`. Keys not in the patch are kept.
    pub(crate) fn merge_state(&self, patch: HashMap<String, Value>) {
        lock(&self.inner.state).extend(patch);
    }

    /// Registers a handler that receives the raw argument list and may fail.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&[Value]) -> Result<(), ClientError> + Send + Sync + 'static,
    {
        let key = event.to_lowercase();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.handlers)
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            proxy: Arc::downgrade(&self.inner),
            event: key,
            id,
        }
    }

    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.subscribe(event, move |args| {
            handler(args);
            Ok(())
        })
    }

    /// Registers a handler for the first argument, decoded as `T`. A missing
    /// argument decodes from `null`.
    pub fn on_typed<T, F>(&self, event: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        self.subscribe(event, move |args| {
            let first = args.first().cloned().unwrap_or(Value::Null);
            let value = serde_json::from_value::<T>(first).map_err(|e| {
                ClientError::MessageProcessing(format!("Bad argument for event {}: {}", name, e))
            })?;
            handler(value);
            Ok(())
        })
    }

    pub fn on_unit<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(event, move |_| {
            handler();
            Ok(())
        })
    }

    /// Runs every handler of `event` in order, outside the registry lock.
    /// Returns the first handler error after all of them ran.
    pub(crate) fn dispatch(&self, event: &str, args: &[Value]) -> Result<(), ClientError> {
        let handlers: Vec<EventHandler> = lock(&self.inner.handlers)
            .get(&event.to_lowercase())
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler(args) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Keeps a handler registered until `unsubscribe` is called. Dropping it
/// leaves the handler in place.
#[derive(Debug)]
pub struct Subscription {
    proxy: Weak<ProxyInner>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Removes exactly this handler.
    pub fn unsubscribe(self) {
        let Some(proxy) = self.proxy.upgrade() else {
            return;
        };
        let mut handlers = lock(&proxy.handlers);
        if let Some(entries) = handlers.get_mut(&self.event) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                handlers.remove(&self.event);
            }
        }
    }
}

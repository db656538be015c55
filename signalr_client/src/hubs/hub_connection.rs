//! # Hub Connection
//!
//! A [`Connection`] that multiplexes named hubs. Inbound messages are read as
//! hub invocations and routed to the matching proxy; messages for hubs with
//! no proxy are ignored. At start the connection data names every hub that
//! has a proxy, so the server knows what this client listens to.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::core::connection::Connection;
use crate::errors::ClientError;
use crate::http::HttpClient;
use crate::hubs::invocation::{HubInvocation, HubRegistration};
use crate::hubs::proxy::HubProxy;

/// Proxies in creation order, keyed by lowercase hub name.
type ProxyRegistry = Arc<Mutex<Vec<(String, HubProxy)>>>;

fn lock(registry: &ProxyRegistry) -> MutexGuard<'_, Vec<(String, HubProxy)>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn find(registry: &ProxyRegistry, hub_name: &str) -> Option<HubProxy> {
    let key = hub_name.to_lowercase();
    lock(registry)
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, proxy)| proxy.clone())
}

#[derive(Clone, Debug)]
pub struct HubConnection {
    connection: Connection,
    proxies: ProxyRegistry,
}

impl Deref for HubConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

/// Appends the default `signalr` path when asked.
pub fn hub_url(url: &str, use_default_url: bool) -> String {
    let mut url = url.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    if use_default_url {
        url.push_str("signalr");
    }
    url
}

impl HubConnection {
    pub fn new(
        url: &str,
        use_default_url: bool,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, ClientError> {
        let connection = Connection::new(&hub_url(url, use_default_url), http)?;
        Ok(Self::from_connection(connection))
    }

    /// Creates a hub connection over the default reqwest binding.
    #[cfg(feature = "reqwest-client")]
    pub fn from_url(
        url: &str,
        use_default_url: bool,
        config: crate::configs::config_client::ClientConfig,
    ) -> Result<Self, ClientError> {
        let connection = Connection::from_url(&hub_url(url, use_default_url), config)?;
        Ok(Self::from_connection(connection))
    }

    /// Layers hub routing over an existing connection. The connection's
    /// sending hook is replaced.
    pub fn from_connection(connection: Connection) -> Self {
        let proxies: ProxyRegistry = Arc::new(Mutex::new(Vec::new()));

        let registry = Arc::clone(&proxies);
        connection.on_received(move |message| route(&registry, message));

        let registry = Arc::clone(&proxies);
        connection.set_sending(move || {
            let registrations: Vec<HubRegistration> = lock(&registry)
                .iter()
                .map(|(_, proxy)| HubRegistration {
                    name: proxy.hub_name().to_string(),
                })
                .collect();
            serde_json::to_string(&registrations).ok()
        });

        Self { connection, proxies }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the proxy for `hub_name`, creating it on first use. Names
    /// match case-insensitively; the first spelling is the one sent to the
    /// server.
    pub fn create_proxy(&self, hub_name: &str) -> HubProxy {
        let key = hub_name.to_lowercase();
        let mut proxies = lock(&self.proxies);
        if let Some((_, proxy)) = proxies.iter().find(|(k, _)| *k == key) {
            return proxy.clone();
        }

        log::debug!("Creating proxy for hub {}", hub_name);
        let proxy = HubProxy::new(hub_name, self.connection.downgrade());
        proxies.push((key, proxy.clone()));
        proxy
    }

    pub fn proxy(&self, hub_name: &str) -> Option<HubProxy> {
        find(&self.proxies, hub_name)
    }
}

/// Delivers one inbound message: state patch first, then handlers.
fn route(registry: &ProxyRegistry, message: &Value) -> Result<(), ClientError> {
    let invocation = serde_json::from_value::<HubInvocation>(message.clone()).map_err(|e| {
        ClientError::MessageProcessing(format!("Not a hub invocation: {}", e))
    })?;

    let Some(proxy) = find(registry, &invocation.hub) else {
        log::debug!("No proxy for hub {}, ignoring {}", invocation.hub, invocation.method);
        return Ok(());
    };

    if let Some(patch) = invocation.state {
        proxy.merge_state(patch);
    }

    proxy.dispatch(&invocation.method, &invocation.args)
}

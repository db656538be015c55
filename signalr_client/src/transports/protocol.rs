//! # Shared Transport Protocol
//!
//! Free functions used by both concrete transports: negotiation, url
//! construction, envelope parsing, send, and the abort handshake.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::core::connection::Connection;
use crate::errors::ClientError;
use crate::http::HttpRequest;

pub const SERVER_SENT_EVENTS: &str = "serverSentEvents";
pub const LONG_POLLING: &str = "longPolling";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiationResponse {
    pub connection_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub protocol_version: String,
}

/// What the caller must do after an envelope was processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeOutcome {
    pub timed_out: bool,
    /// The server asked the client to stop. Nothing else in the envelope was
    /// applied.
    pub disconnected: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ServerEnvelope {
    messages: Option<Vec<Value>>,
    message_id: Option<Value>,
    timed_out: bool,
    disconnect: bool,
    transport_data: Option<TransportData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TransportData {
    groups: Option<Vec<String>>,
}

/// Percent-encodes a query value.
pub fn escape(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn custom_query(connection: &Connection) -> String {
    connection
        .query_string()
        .map(|q| format!("&{}", q))
        .unwrap_or_default()
}

fn connection_id(connection: &Connection) -> String {
    escape(&connection.connection_id().unwrap_or_default())
}

/// `POST {url}negotiate`.
///
/// # Errors
/// [`ClientError::Protocol`] when the body is empty or not a negotiation
/// response; [`ClientError::Network`] when the request itself fails.
pub async fn negotiate(connection: &Connection) -> Result<NegotiationResponse, ClientError> {
    let mut url = format!("{}negotiate", connection.url());
    if let Some(query) = connection.query_string() {
        url.push('?');
        url.push_str(query);
    }

    log::debug!("POST {}", url);
    let response = connection.http().post(HttpRequest::new(url), Vec::new()).await?;
    let raw = response.read_as_string().await?;

    if raw.trim().is_empty() {
        return Err(ClientError::Protocol("Server negotiation failed".to_string()));
    }

    serde_json::from_str::<NegotiationResponse>(&raw)
        .map_err(|e| ClientError::Protocol(format!("Unreadable negotiation response: {}", e)))
}

/// Accepts `1.0` only. The version string must have two to four numeric
/// components.
pub fn verify_protocol_version(version: &str) -> Result<(), ClientError> {
    let parts: Option<Vec<u32>> = version
        .trim()
        .split('.')
        .map(|p| p.parse::<u32>().ok())
        .collect();

    match parts.as_deref() {
        Some([1, 0, rest @ ..]) if rest.len() <= 2 => Ok(()),
        _ => Err(ClientError::IncompatibleProtocol(version.to_string())),
    }
}

/// `?transport=..&connectionId=..[&messageId=..][&groups=..][&connectionData=..][&custom]`
pub fn receive_query_string(
    transport: &str,
    connection: &Connection,
    data: Option<&str>,
    include_groups: bool,
) -> String {
    let mut query = format!("?transport={}&connectionId={}", transport, connection_id(connection));

    if let Some(message_id) = connection.message_id() {
        query.push_str("&messageId=");
        query.push_str(&escape(&message_id));
    }

    if include_groups {
        if let Some(groups) = groups_as_string(connection) {
            query.push_str("&groups=");
            query.push_str(&groups);
        }
    }

    if let Some(data) = data {
        query.push_str("&connectionData=");
        query.push_str(&escape(data));
    }

    query.push_str(&custom_query(connection));
    query
}

/// The group set as an escaped JSON array, or `None` when there are no groups.
pub fn groups_as_string(connection: &Connection) -> Option<String> {
    let groups = connection.groups();
    if groups.is_empty() {
        return None;
    }
    serde_json::to_string(&groups).ok().map(|json| escape(&json))
}

/// Applies one response body to the connection.
///
/// Messages are offered in array order; a failing message is reported and
/// the rest of the batch still runs. The cursor and then the group set are
/// updated only after delivery. A disconnect envelope changes nothing.
pub async fn process_response(connection: &Connection, raw: &str) -> EnvelopeOutcome {
    if raw.trim().is_empty() {
        return EnvelopeOutcome::default();
    }

    let _serialized = connection.receive_lock().lock().await;

    let envelope = match serde_json::from_str::<ServerEnvelope>(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            connection.dispatch_error(&ClientError::MessageProcessing(format!(
                "Failed to read response: {}",
                e
            )));
            return EnvelopeOutcome::default();
        }
    };

    let outcome = EnvelopeOutcome {
        timed_out: envelope.timed_out,
        disconnected: envelope.disconnect,
    };

    if outcome.disconnected {
        return outcome;
    }

    for message in envelope.messages.iter().flatten() {
        if let Err(e) = connection.dispatch_received(message) {
            log::error!("Failed to process message: {}", e);
            connection.dispatch_error(&e);
        }
    }

    match envelope.message_id {
        Some(Value::String(cursor)) => connection.set_message_id(cursor),
        Some(Value::Number(cursor)) => connection.set_message_id(cursor.to_string()),
        _ => {}
    }

    if let Some(groups) = envelope.transport_data.and_then(|t| t.groups) {
        connection.set_groups(groups);
    }

    outcome
}

/// `POST {url}send` with the payload as the `data` form field. Returns the
/// response body, or `None` when it is empty.
pub async fn send(
    connection: &Connection,
    transport: &str,
    data: String,
) -> Result<Option<String>, ClientError> {
    let url = format!(
        "{}send?transport={}&connectionId={}{}",
        connection.url(),
        transport,
        connection_id(connection),
        custom_query(connection)
    );

    log::debug!("POST {}", url);
    let response = connection
        .http()
        .post(HttpRequest::new(url), vec![("data".to_string(), data)])
        .await?;
    let raw = response.read_as_string().await?;

    Ok(Some(raw).filter(|body| !body.is_empty()))
}

/// The abort handle of a transport's current receive request.
#[derive(Debug, Default)]
pub struct InFlightRequest(Mutex<Option<CancellationToken>>);

impl InFlightRequest {
    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a new request whose token is a child of `parent`.
    pub fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        *self.slot() = Some(token.clone());
        token
    }

    pub fn finish(&self) {
        self.slot().take();
    }

    pub fn take(&self) -> Option<CancellationToken> {
        self.slot().take()
    }
}

/// If a request is in flight, tells the server with a bounded-wait
/// `POST {url}abort` and then cancels the local request. Failures of the
/// notice are logged and ignored.
pub async fn abort(connection: &Connection, transport: &str, in_flight: &InFlightRequest) {
    let Some(request) = in_flight.take() else {
        return;
    };

    let url = format!(
        "{}abort?transport={}&connectionId={}",
        connection.url(),
        transport,
        connection_id(connection)
    );

    log::debug!("POST {}", url);
    let notice = connection.http().post(HttpRequest::new(url), Vec::new());
    match tokio::time::timeout(connection.config().abort_timeout(), notice).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::warn!("Clean disconnect failed: {}", e),
        Err(_) => log::warn!("Clean disconnect timed out"),
    }

    request.cancel();
}

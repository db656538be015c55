//! # Test Harness
//!
//! Network-free collaborators shared by the integration suites in `tests/`.
//!
//! - **`MockHttpClient`**: a scripted [`HttpClient`]. Replies are queued per
//!   endpoint and every request is recorded.
//! - **`ScriptedTransport`**: a [`ClientTransport`] whose start succeeds or
//!   fails on demand and which records every call it receives.
//! - Small polling helpers for asserting on asynchronous outcomes.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_channel::mpsc;
use futures_util::future::{self, BoxFuture};
use futures_util::{FutureExt, StreamExt};

use signalr_client::core::ConnectionEvent;
use signalr_client::{
    ClientConfig, ClientError, ClientTransport, Connection, HttpClient, HttpError, HttpRequest,
    HttpResponse,
};

/// Which protocol endpoint a url targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Negotiate,
    Send,
    Abort,
    /// `connect`, a reconnect, or a poll.
    Receive,
}

impl Endpoint {
    pub fn classify(url: &str) -> Self {
        let path = url.split('?').next().unwrap_or_default();
        match path.rsplit('/').next().unwrap_or_default() {
            "negotiate" => Endpoint::Negotiate,
            "send" => Endpoint::Send,
            "abort" => Endpoint::Abort,
            _ => Endpoint::Receive,
        }
    }
}

/// A scripted answer.
pub enum Reply {
    Text(String),
    Fault(HttpError),
    /// Never completes; only an abort ends it.
    Pending,
    /// A text body delivered after a delay.
    Delayed(Duration, String),
    Stream(mpsc::UnboundedReceiver<Result<Bytes, HttpError>>),
}

/// Writes into a streamed response body.
#[derive(Clone)]
pub struct StreamFeed(mpsc::UnboundedSender<Result<Bytes, HttpError>>);

impl StreamFeed {
    pub fn send(&self, text: &str) {
        let _ = self.0.unbounded_send(Ok(Bytes::from(text.to_string())));
    }

    /// Sends `line` followed by a newline.
    pub fn line(&self, line: &str) {
        self.send(&format!("{}\n", line));
    }

    pub fn fail(&self, error: HttpError) {
        let _ = self.0.unbounded_send(Err(error));
    }

    /// Ends the body cleanly.
    pub fn close(&self) {
        self.0.close_channel();
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub endpoint: Endpoint,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Unscripted endpoints answer with an empty body, except receive requests,
/// which stay pending.
#[derive(Default)]
pub struct MockHttpClient {
    replies: Mutex<HashMap<Endpoint, VecDeque<Reply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, endpoint: Endpoint, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(reply);
    }

    pub fn reply_text(&self, endpoint: Endpoint, body: &str) {
        self.push(endpoint, Reply::Text(body.to_string()));
    }

    pub fn reply_fault(&self, endpoint: Endpoint, error: HttpError) {
        self.push(endpoint, Reply::Fault(error));
    }

    pub fn reply_pending(&self, endpoint: Endpoint) {
        self.push(endpoint, Reply::Pending);
    }

    /// Queues a streamed reply and returns the handle that feeds it.
    pub fn reply_stream(&self, endpoint: Endpoint) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded();
        self.push(endpoint, Reply::Stream(rx));
        StreamFeed(tx)
    }

    fn negotiation_body(connection_id: &str, protocol_version: &str) -> String {
        serde_json::json!({
            "ConnectionId": connection_id,
            "Url": "/echo",
            "ProtocolVersion": protocol_version,
        })
        .to_string()
    }

    /// Queues a successful negotiation.
    pub fn negotiate(&self, connection_id: &str, protocol_version: &str) {
        let body = Self::negotiation_body(connection_id, protocol_version);
        self.reply_text(Endpoint::Negotiate, &body);
    }

    /// Queues a successful negotiation that answers after `delay`.
    pub fn negotiate_after(&self, connection_id: &str, protocol_version: &str, delay: Duration) {
        let body = Self::negotiation_body(connection_id, protocol_version);
        self.push(Endpoint::Negotiate, Reply::Delayed(delay, body));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, endpoint: Endpoint) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect()
    }

    fn respond(
        &self,
        method: &'static str,
        request: HttpRequest,
        form: Vec<(String, String)>,
    ) -> BoxFuture<'static, Result<HttpResponse, HttpError>> {
        let endpoint = Endpoint::classify(&request.url);
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            endpoint,
            url: request.url,
            headers: request.headers,
            form,
        });

        let scripted = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);

        let reply = scripted.unwrap_or(match endpoint {
            Endpoint::Receive => Reply::Pending,
            _ => Reply::Text(String::new()),
        });

        match reply {
            Reply::Text(body) => future::ready(Ok(HttpResponse::from_text(200, body))).boxed(),
            Reply::Fault(error) => future::ready(Err(error)).boxed(),
            Reply::Pending => future::pending().boxed(),
            Reply::Delayed(delay, body) => async move {
                tokio::time::sleep(delay).await;
                Ok(HttpResponse::from_text(200, body))
            }
            .boxed(),
            Reply::Stream(rx) => future::ready(Ok(HttpResponse::from_stream(200, rx.boxed()))).boxed(),
        }
    }
}

impl HttpClient for MockHttpClient {
    fn get(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, HttpError>> {
        self.respond("GET", request, Vec::new())
    }

    fn post(
        &self,
        request: HttpRequest,
        form: Vec<(String, String)>,
    ) -> BoxFuture<'static, Result<HttpResponse, HttpError>> {
        self.respond("POST", request, form)
    }
}

/// One call seen by a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Start(Option<String>),
    Send(String),
    Stop,
}

/// A transport that does no I/O.
pub struct ScriptedTransport {
    name: &'static str,
    start_fails: bool,
    send_reply: Option<String>,
    calls: Mutex<Vec<TransportCall>>,
}

impl ScriptedTransport {
    pub fn succeeding(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            start_fails: false,
            send_reply: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            start_fails: true,
            send_reply: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// A succeeding transport whose sends answer with `body`.
    pub fn answering(name: &'static str, body: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            start_fails: false,
            send_reply: Some(body.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, TransportCall::Start(_)))
            .count()
    }
}

impl ClientTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start<'a>(
        &'a self,
        _connection: &'a Connection,
        data: Option<String>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        self.calls.lock().unwrap().push(TransportCall::Start(data));
        let result = if self.start_fails {
            Err(ClientError::Network(HttpError::Request(format!("{} refused", self.name))))
        } else {
            Ok(())
        };
        future::ready(result).boxed()
    }

    fn send<'a>(
        &'a self,
        _connection: &'a Connection,
        data: String,
    ) -> BoxFuture<'a, Result<Option<String>, ClientError>> {
        self.calls.lock().unwrap().push(TransportCall::Send(data));
        future::ready(Ok(self.send_reply.clone())).boxed()
    }

    fn stop<'a>(&'a self, _connection: &'a Connection) -> BoxFuture<'a, ()> {
        self.calls.lock().unwrap().push(TransportCall::Stop);
        future::ready(()).boxed()
    }
}

/// Short delays so reconnect paths run in milliseconds.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        sse_reconnect_delay_ms: 50,
        sse_connection_timeout_ms: 300,
        long_polling_reconnect_delay_ms: 200,
        error_backoff_ms: 50,
        abort_timeout_ms: 200,
        ..ClientConfig::default()
    }
}

pub const BASE_URL: &str = "http://localhost:8080/echo";

pub fn connection(http: &Arc<MockHttpClient>) -> Connection {
    Connection::with_options(BASE_URL, None, Arc::clone(http) as Arc<dyn HttpClient>, fast_config())
        .unwrap()
}

/// Polls `condition` every 10ms until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Awaits `fut` for at most two seconds.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .unwrap()
}

/// Drains whatever events are queued right now, dropping state changes.
pub fn drain_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, ConnectionEvent::StateChanged(_)) {
            events.push(event);
        }
    }
    events
}

//! # HTTP Collaborator
//!
//! The transports never talk to a socket directly. Everything goes through the
//! [`HttpClient`] trait, which exposes only the two verbs the protocol needs:
//! a `GET` and a form-encoded `POST`, both answering with a status code and a
//! streamed body.
//!
//! ## Contained Modules:
//!
//! - **`reqwest_client`**: the default binding, built on `reqwest` and
//!   `reqwest-middleware` with an optional transient-retry policy.
//!
//! Cancellation is not part of the trait. Callers race the returned future
//! against a `CancellationToken` (see [`abortable`]); dropping the future is
//! what aborts the request on the wire.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::future::Future;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The reqwest-backed implementation of [`HttpClient`].
#[cfg(feature = "reqwest-client")]
pub mod reqwest_client;

#[cfg(feature = "reqwest-client")]
pub use reqwest_client::ReqwestHttpClient;

/// Failure modes of a single HTTP exchange.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// The request could not be sent or no response arrived.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The connection or body stream closed underneath us.
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// The server answered with a non-success status.
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request was cancelled locally.
    #[error("Request aborted")]
    Aborted,
}

impl HttpError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, HttpError::Aborted)
    }

    /// Stream-closed conditions happen whenever the server drops an idle
    /// connection; they are retried without raising an error notification.
    pub fn is_benign(&self) -> bool {
        matches!(self, HttpError::StreamClosed(_))
    }
}

/// An outgoing request: the absolute url plus any extra headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Sets the `Accept` header.
    pub fn accept(mut self, value: &str) -> Self {
        self.headers.push(("Accept".to_string(), value.to_string()));
        self
    }
}

/// A response whose body is consumed either whole or as a stream of chunks.
pub struct HttpResponse {
    pub status: u16,
    body: BoxStream<'static, Result<Bytes, HttpError>>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// A response with a fully buffered text body.
    pub fn from_text(status: u16, body: impl Into<String>) -> Self {
        let bytes = Bytes::from(body.into());
        Self {
            status,
            body: stream::once(async move { Ok(bytes) }).boxed(),
        }
    }

    /// A response backed by an arbitrary chunk stream.
    pub fn from_stream(status: u16, body: BoxStream<'static, Result<Bytes, HttpError>>) -> Self {
        Self { status, body }
    }

    /// Drains the body and decodes it as UTF-8 (lossy).
    pub async fn read_as_string(self) -> Result<String, HttpError> {
        let mut body = self.body;
        let mut collected = BytesMut::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    /// Hands the raw chunk stream to the caller.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, HttpError>> {
        self.body
    }
}

/// A minimal asynchronous HTTP client.
///
/// Implementations handle TLS, pooling and credentials; the transports only
/// need these two calls.
pub trait HttpClient: Send + Sync {
    fn get(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, HttpError>>;

    /// POST with an `application/x-www-form-urlencoded` body built from `form`.
    fn post(
        &self,
        request: HttpRequest,
        form: Vec<(String, String)>,
    ) -> BoxFuture<'static, Result<HttpResponse, HttpError>>;
}

/// Runs `fut` unless `token` is cancelled first, in which case the future is
/// dropped and [`HttpError::Aborted`] is returned.
pub async fn abortable<T, F>(token: &CancellationToken, fut: F) -> Result<T, HttpError>
where
    F: Future<Output = Result<T, HttpError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(HttpError::Aborted),
        result = fut => result,
    }
}

//! # Reqwest HTTP Binding
//!
//! The default [`HttpClient`], a thin wrapper around `reqwest` with
//! `reqwest-middleware` retry support. Retries are disabled unless the
//! configuration asks for them: the transports run their own reconnect logic,
//! and a silent retry of a `connect` poll would hide faults from it.

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use super::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::configs::config_client::ClientConfig;

/// A `reqwest`-backed implementation of [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// Sent with every request.
    user_agent: String,
}

impl ReqwestHttpClient {
    /// Creates a client with default settings and no retries.
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default())
    }

    /// Creates a client honouring `httpMaxRetries` and `userAgent`.
    pub fn from_config(config: &ClientConfig) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.http_max_retries);

        let inner = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            inner,
            user_agent: config.user_agent(),
        }
    }

    fn prepare(&self, builder: RequestBuilder, request: &HttpRequest) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => log::warn!("Dropping invalid header {}: {}", name, value),
            }
        }
        builder.headers(headers)
    }

    fn execute(&self, builder: RequestBuilder) -> BoxFuture<'static, Result<HttpResponse, HttpError>> {
        async move {
            let response = builder.send().await.map_err(map_middleware_error)?;
            let status = response.status();

            if !status.is_success() {
                // Capture the error body for diagnostics
                let body = response.text().await.unwrap_or_default();
                return Err(HttpError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let body = response.bytes_stream().map_err(map_body_error).boxed();
            Ok(HttpResponse::from_stream(status.as_u16(), body))
        }
        .boxed()
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, HttpError>> {
        let builder = self.prepare(self.inner.get(&request.url), &request);
        self.execute(builder)
    }

    fn post(
        &self,
        request: HttpRequest,
        form: Vec<(String, String)>,
    ) -> BoxFuture<'static, Result<HttpResponse, HttpError>> {
        let builder = self
            .prepare(self.inner.post(&request.url), &request)
            .form(&form);
        self.execute(builder)
    }
}

fn map_middleware_error(err: reqwest_middleware::Error) -> HttpError {
    match err {
        reqwest_middleware::Error::Reqwest(e) => map_body_error(e),
        reqwest_middleware::Error::Middleware(e) => HttpError::Request(e.to_string()),
    }
}

fn map_body_error(err: reqwest::Error) -> HttpError {
    if err.is_body() || err.is_decode() {
        HttpError::StreamClosed(err.to_string())
    } else {
        HttpError::Request(err.to_string())
    }
}

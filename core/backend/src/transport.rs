//! HTTP transport seam.
//!
//! Backend helpers describe requests as plain [`HttpRequest`] values and hand
//! them to an [`HttpTransport`]. The transport either completes the exchange
//! (any status code) or fails with a terminal error; status classification is
//! left to the helpers. [`RetryingTransport`] layers the backoff policy over
//! any transport.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;
use url::Url;

use docsync_common::{Error, Result};

use crate::retry::{is_transient, RetryConfig, RetryExecutor};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    /// Whether the request has no effect on the server, so replaying it is harmless.
    pub fn is_safe(self) -> bool {
        matches!(self, Method::Get)
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A transport-independent HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    /// Value of a query parameter, if set.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a header, if set (case-insensitive name).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// JSON body, if any.
    pub fn json_body(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Some(RequestBody::Json(value)) => Some(value),
            _ => None,
        }
    }

    /// URL with query parameters appended.
    pub fn full_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidInput(format!("Invalid URL {}: {}", self.url, e)))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Build a response with a JSON body.
    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }
}

/// Issues HTTP requests on behalf of the backend helpers.
///
/// Implementations return `Ok` for every completed exchange, whatever its
/// status, and `Err` only when no usable response could be obtained.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Whether `outcome` of a `method` request is worth another attempt.
///
/// Safe methods are retried on any transient failure. Others only when the
/// server cannot have acted on the request: the connection was refused, or
/// the server answered 429.
pub fn should_retry(method: Method, outcome: &Result<HttpResponse>) -> bool {
    match outcome {
        Ok(response) if response.status == 429 => true,
        Ok(response) => response.status >= 500 && method.is_safe(),
        Err(Error::Connect(_)) => true,
        Err(err) => method.is_safe() && is_transient(err),
    }
}

/// Transport decorator applying a [`RetryConfig`] to every request.
pub struct RetryingTransport<T> {
    inner: T,
    retry: RetryExecutor,
}

impl<T: HttpTransport> RetryingTransport<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self {
            inner,
            retry: RetryExecutor::new(config),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for RetryingTransport<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let what = format!("{:?} {}", request.method, request.url);
        let method = request.method;
        self.retry
            .execute_when(
                &what,
                |outcome| should_retry(method, outcome),
                || self.inner.send(request.clone()),
            )
            .await
    }
}

/// Production transport on top of reqwest. Makes a single attempt per request.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent("docsync/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Create a transport wrapped in a custom retry policy.
    pub fn with_retry(config: RetryConfig) -> Result<RetryingTransport<Self>> {
        Ok(RetryingTransport::new(Self::new()?, config))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("{:?} {}", request.method, request.url);
        let url = request.full_url()?;
        let mut builder = self.http.request(request.method.to_reqwest(), url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match &request.body {
            Some(RequestBody::Json(value)) => {
                builder = builder.json(value);
            }
            Some(RequestBody::Form(pairs)) => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter())
                    .finish();
                builder = builder
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body);
            }
            None => {}
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                Error::Connect(format!("Request to {} failed: {}", request.url, e))
            } else {
                Error::Network(format!("Request to {} failed: {}", request.url, e))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

/// Scripted transport for tests: replays queued responses in order and
/// records every request it receives.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn push(&self, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    /// Queue a JSON response.
    pub fn push_json(&self, status: u16, value: serde_json::Value) {
        self.push(HttpResponse::json_body(status, &value));
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of responses not consumed yet.
    pub fn pending(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| Error::Network(format!("No mock response queued for {}", url)))
    }
}

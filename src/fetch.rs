//! Fetch Boundary
//!
//! Request/response types shared by the interception cache and the prefetch
//! coordinator, and the `Fetcher` trait they use to reach the network.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use serde_json::Value;
use url::Url;

use crate::error::FetchError;

/// Headers that describe a single connection and must not be replayed.
const HOP_BY_HOP_HEADERS: [&str; 6] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
    "te",
];

// == Request Mode ==
/// Whether the request is a top-level page navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Document navigation (address bar, link click)
    Navigate,
    /// Subresource or programmatic request
    #[default]
    Other,
}

// == Request ==
/// Outgoing HTTP request descriptor.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub mode: RequestMode,
}

impl Request {
    /// Creates a request with an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            mode: RequestMode::Other,
        }
    }

    /// Parses `url` and builds a GET request.
    pub fn get(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidRequest(format!("{url}: {e}")))?;
        Ok(Self::new(Method::GET, url))
    }

    /// Parses `url` and builds a GET navigation request.
    pub fn navigate(url: &str) -> Result<Self, FetchError> {
        Ok(Self::get(url)?.with_mode(RequestMode::Navigate))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

// == Response ==
/// HTTP response as seen by the caches: status, headers and a fully read body.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Empty-bodied response with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Plain-text response.
    pub fn text(status: StatusCode, text: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::new(status, headers, text.to_string())
    }

    /// JSON response.
    pub fn json(status: StatusCode, value: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, value.to_string())
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns a header value as a string if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets (or replaces) a header. Invalid names or values are ignored.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Parses the body as JSON.
    pub fn json_body(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Approximate stored footprint: body plus header bytes.
    pub fn byte_size(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.as_str().len() + v.len())
            .sum();
        self.body.len() + headers
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

// == Fetcher Trait ==
/// Network boundary. Implementations return `Err` only for transport
/// failures; any HTTP status (including 4xx/5xx) is a successful fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}

/// Shared fetcher handle.
pub type SharedFetcher = Arc<dyn Fetcher>;

// == HTTP Fetcher ==
/// `Fetcher` backed by a pooled reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let upstream = self
            .client
            .request(request.method, request.url.as_str())
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        // The body is fully buffered, so the upstream framing no longer applies
        headers.remove(header::CONTENT_LENGTH);

        let body = upstream
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Response::new(status, headers, body))
    }
}

/// Removes connection-scoped headers before a message is forwarded.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

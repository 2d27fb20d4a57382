//! # Offline Net
//!
//! Request/response model and network access for the Offline Shell cache layer.
//!
//! ## Design Goals
//!
//! 1. **Fully buffered responses**: a response can be duplicated before anyone reads it
//! 2. **Origin classification**: same-origin responses are `Basic`, everything else `Opaque`
//! 3. **Pluggable transport**: the cache layer only sees the [`Fetcher`] trait
//! 4. **Bypass rules**: live-data endpoints skip the cache entirely

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use url::Url;

pub mod bypass;
pub mod loader;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bypass::{BypassList, PatternType, UrlPattern};
pub use loader::{HttpFetcher, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    /// No particular destination (fetch(), XHR).
    #[default]
    Empty,
    /// Full-document navigation.
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    Audio,
    Video,
    Worker,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Empty => "",
            Destination::Document => "document",
            Destination::Image => "image",
            Destination::Script => "script",
            Destination::Style => "style",
            Destination::Font => "font",
            Destination::Manifest => "manifest",
            Destination::Audio => "audio",
            Destination::Video => "video",
            Destination::Worker => "worker",
        }
    }
}

impl FromStr for Destination {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => Destination::Empty,
            "document" => Destination::Document,
            "image" => Destination::Image,
            "script" => Destination::Script,
            "style" => Destination::Style,
            "font" => Destination::Font,
            "manifest" => Destination::Manifest,
            "audio" => Destination::Audio,
            "video" => Destination::Video,
            "worker" => Destination::Worker,
            other => {
                return Err(NetError::RequestFailed(format!(
                    "unknown destination: {other}"
                )))
            }
        })
    }
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: Destination,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            destination: Destination::Empty,
        }
    }

    /// Create a document navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).destination(Destination::Document)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Whether this is a full-document navigation.
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }
}

/// Origin classification of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response whose contents the page may not inspect.
    Opaque,
    /// Network error.
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Opaque => "opaque",
            ResponseType::Error => "error",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(ResponseType::Basic),
            "opaque" => Ok(ResponseType::Opaque),
            "error" => Ok(ResponseType::Error),
            other => Err(NetError::RequestFailed(format!(
                "unknown response type: {other}"
            ))),
        }
    }
}

/// HTTP response with a fully buffered body.
///
/// Cloning shares the body bytes without copying, and no clone can consume
/// the body out from under another.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub redirected: bool,
    body: Bytes,
}

impl Response {
    /// Create a response.
    pub fn new(url: Url, status: StatusCode, response_type: ResponseType, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type,
            redirected: false,
            body,
        }
    }

    /// Create a locally synthesized response.
    pub fn synthesized(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        let mut response = Self::new(url, status, ResponseType::Basic, body.into());
        response.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Whether runtime handling may persist this response: a 200, same-origin,
    /// not reached through a redirect.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
            && self.response_type == ResponseType::Basic
            && !self.redirected
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Take the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Transport used by the cache layer to reach the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. HTTP error statuses are `Ok`; only transport
    /// failures (unreachable, refused, timed out) are `Err`.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

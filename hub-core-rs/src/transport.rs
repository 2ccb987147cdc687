//! HTTP transport for outbound calls
//!
//! The executor talks to the network only through the [`Transport`] trait.
//! [`HttpTransport`] is the production implementation over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TransportError;

pub use reqwest::Method;

/// Header carrying the request identifier
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
/// Header carrying the correlation identifier
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Default user agent for outbound requests
pub const DEFAULT_USER_AGENT: &str = concat!("hub-core/", env!("CARGO_PKG_VERSION"));

/// A fully built outbound request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn with_body<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_value(body)
            .map_err(|e| TransportError::InvalidRequest(format!("Cannot encode body: {}", e)))?;
        Ok(self.with_json(body))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response as received from the network
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issues a request and returns the raw response or a network-level failure
///
/// Cancellation is applied by the caller by dropping the returned future.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport with optional static token authentication
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpTransport {
    /// Create a transport; `token` is sent as `Authorization: Token <token>`
    pub fn new(token: Option<String>, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self { client, token })
    }

    /// Wrap an existing client (shared connection pool)
    pub fn with_client(client: reqwest::Client, token: Option<String>) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref token) = self.token {
            builder = builder.header(AUTHORIZATION, format!("Token {}", token));
        }
        if let Some(ref body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .json(body);
        }

        debug!("{} {}", request.method, request.url);

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        warn!("HTTP request failed: {}", error);
        TransportError::Network(error.to_string())
    }
}

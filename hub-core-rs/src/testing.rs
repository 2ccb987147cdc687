//! Test doubles for code built on the executor
//!
//! Enabled inside this crate's tests and, for downstream crates, through the
//! `test-util` feature.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// In-memory transport replaying queued responses and recording requests
///
/// An empty queue answers with a network error.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Result<TransportResponse, TransportError>) {
        self.responses.lock().push_back(response);
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(Ok(TransportResponse::new(status, body.to_string())));
    }

    /// Requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no response queued".into())))
    }
}

//! Error types shared across the hub client

use std::time::Duration;

use thiserror::Error;

/// Failure to parse a protocol keyword
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseTypeError {
    #[error("Unknown module: {0}")]
    Module(String),

    #[error("Unknown interface role: {0}")]
    Role(String),

    #[error("Unknown protocol version: {0}")]
    Version(String),
}

/// Network-level failure of a remote exchange
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Failure raised by an event hook observer
#[derive(Debug, Clone, Error)]
pub enum HookError {
    #[error("Observer '{observer}' failed: {message}")]
    Failed { observer: String, message: String },

    #[error("Observer '{0}' panicked")]
    Panicked(String),
}

/// Failure to turn a 2xx response body into the expected payload
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Response body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Remote reported status {status_code}: {message}")]
    Rejected { status_code: u32, message: String },

    #[error("Response carries no data")]
    MissingData,

    #[error("Expected an array of items")]
    NotAnArray,

    #[error("Invalid payload: {0}")]
    Invalid(String),

    #[error("Invalid item at index {index}: {message}")]
    InvalidItem { index: usize, message: String },
}

/// A classified call failure, for callers preferring `Result`
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("{message}")]
    Protocol {
        message: String,
        detail: Option<String>,
        status: Option<u16>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

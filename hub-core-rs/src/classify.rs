//! Result classification
//!
//! Every transport outcome maps to exactly one [`CallResult`] variant:
//! - 2xx: the payload parser runs; parse or validation failure is a protocol error
//! - any other status: protocol error carrying the HTTP status and server detail
//! - network failure, timeout, cancellation: transport exception
//!
//! 2xx bodies use the OCPI response envelope:
//! `{"data": ..., "status_code": 1000, "status_message": "...", "timestamp": "..."}`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallError, PayloadError, TransportError};
use crate::transport::TransportResponse;

/// Message of the protocol error returned when the directory has no endpoint
pub const NO_REMOTE_URL: &str = "No remote URL available";

/// Header carrying the total size of a paginated collection
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";
/// Header carrying the page size the server applied
pub const LIMIT_HEADER: &str = "X-Limit";
/// Header carrying the next page link
pub const LINK_HEADER: &str = "Link";

/// OCPI response envelope wrapping every 2xx body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    pub status_code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ResponseEnvelope {
    /// OCPI status codes 1xxx signal success
    pub fn is_success(&self) -> bool {
        (1000..2000).contains(&self.status_code)
    }
}

/// Response metadata accompanying a classified result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpMeta {
    pub status: u16,
    pub ocpi_status_code: Option<u32>,
    pub ocpi_status_message: Option<String>,
    pub total_count: Option<u64>,
    pub limit: Option<u64>,
    pub next_link: Option<String>,
    pub remote_timestamp: Option<DateTime<Utc>>,
}

impl HttpMeta {
    pub fn from_response(response: &TransportResponse) -> Self {
        let envelope = serde_json::from_slice::<ResponseEnvelope>(&response.body).ok();

        Self {
            status: response.status,
            ocpi_status_code: envelope.as_ref().map(|e| e.status_code),
            ocpi_status_message: envelope.as_ref().and_then(|e| e.status_message.clone()),
            total_count: response
                .header(TOTAL_COUNT_HEADER)
                .and_then(|v| v.trim().parse().ok()),
            limit: response
                .header(LIMIT_HEADER)
                .and_then(|v| v.trim().parse().ok()),
            next_link: response.header(LINK_HEADER).and_then(next_link),
            remote_timestamp: envelope.and_then(|e| e.timestamp),
        }
    }
}

/// Extract the `rel="next"` target from a `Link` header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if is_next {
            Some(target.trim_start_matches('<').trim_end_matches('>').to_string())
        } else {
            None
        }
    })
}

/// Classified outcome of a remote call
#[derive(Debug)]
pub enum CallResult<T> {
    Success {
        payload: T,
        meta: HttpMeta,
    },
    ProtocolError {
        message: String,
        detail: Option<String>,
        meta: Option<HttpMeta>,
    },
    TransportException {
        cause: TransportError,
    },
}

/// Which variant a result is, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    ProtocolError,
    TransportException,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::ProtocolError => "protocol_error",
            OutcomeKind::TransportException => "transport_exception",
        }
    }
}

/// Payload-free description of a result, handed to observers and the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    pub kind: OutcomeKind,
    pub http_status: Option<u16>,
    pub message: Option<String>,
}

impl<T> CallResult<T> {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        CallResult::ProtocolError {
            message: message.into(),
            detail: None,
            meta: None,
        }
    }

    /// Result of a call whose target did not resolve
    pub fn no_remote_url() -> Self {
        Self::protocol_error(NO_REMOTE_URL)
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            CallResult::Success { .. } => OutcomeKind::Success,
            CallResult::ProtocolError { .. } => OutcomeKind::ProtocolError,
            CallResult::TransportException { .. } => OutcomeKind::TransportException,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success { .. })
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            CallResult::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn into_payload(self) -> Option<T> {
        match self {
            CallResult::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn meta(&self) -> Option<&HttpMeta> {
        match self {
            CallResult::Success { meta, .. } => Some(meta),
            CallResult::ProtocolError { meta, .. } => meta.as_ref(),
            CallResult::TransportException { .. } => None,
        }
    }

    /// Human-readable message for the error branches
    pub fn error_message(&self) -> Option<String> {
        match self {
            CallResult::Success { .. } => None,
            CallResult::ProtocolError { message, .. } => Some(message.clone()),
            CallResult::TransportException { cause } => Some(cause.to_string()),
        }
    }

    /// Server diagnostic carried by a protocol error
    pub fn detail(&self) -> Option<&str> {
        match self {
            CallResult::ProtocolError { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            kind: self.kind(),
            http_status: self.meta().map(|m| m.status),
            message: self.error_message(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallResult<U> {
        match self {
            CallResult::Success { payload, meta } => CallResult::Success {
                payload: f(payload),
                meta,
            },
            CallResult::ProtocolError {
                message,
                detail,
                meta,
            } => CallResult::ProtocolError {
                message,
                detail,
                meta,
            },
            CallResult::TransportException { cause } => CallResult::TransportException { cause },
        }
    }

    pub fn into_result(self) -> Result<T, CallError> {
        match self {
            CallResult::Success { payload, .. } => Ok(payload),
            CallResult::ProtocolError {
                message,
                detail,
                meta,
            } => Err(CallError::Protocol {
                message,
                detail,
                status: meta.map(|m| m.status),
            }),
            CallResult::TransportException { cause } => Err(CallError::Transport(cause)),
        }
    }
}

/// Classify a transport outcome
///
/// `client_error_hint` is appended to the message of 4xx errors; it names a
/// probable cause the caller knows about (an omitted mandatory filter).
pub fn classify<T, P>(
    outcome: Result<TransportResponse, TransportError>,
    client_error_hint: Option<&str>,
    parse: P,
) -> CallResult<T>
where
    P: FnOnce(&TransportResponse) -> Result<T, PayloadError>,
{
    let response = match outcome {
        Ok(response) => response,
        Err(cause) => return CallResult::TransportException { cause },
    };

    let meta = HttpMeta::from_response(&response);

    if response.is_success() {
        return match parse(&response) {
            Ok(payload) => CallResult::Success { payload, meta },
            Err(e) => CallResult::ProtocolError {
                message: e.to_string(),
                detail: non_empty(response.text()),
                meta: Some(meta),
            },
        };
    }

    let server_message = meta
        .ocpi_status_message
        .clone()
        .or_else(|| status_message_of(&response.body));

    let mut message = match server_message {
        Some(ref text) => format!("Remote returned HTTP {}: {}", response.status, text),
        None => format!("Remote returned HTTP {}", response.status),
    };

    if (400..500).contains(&response.status) {
        if let Some(hint) = client_error_hint {
            message = format!("{}; {}", message, hint);
        }
    }

    CallResult::ProtocolError {
        message,
        detail: server_message.or_else(|| non_empty(response.text())),
        meta: Some(meta),
    }
}

/// `status_message` of an error body that is not a full response envelope
fn status_message_of(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("status_message")?
        .as_str()
        .map(str::to_string)
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parse the response envelope and reject non-1xxx OCPI status codes
pub fn parse_envelope(response: &TransportResponse) -> Result<ResponseEnvelope, PayloadError> {
    let envelope: ResponseEnvelope = serde_json::from_slice(&response.body)
        .map_err(|e| PayloadError::InvalidJson(e.to_string()))?;

    if !envelope.is_success() {
        return Err(PayloadError::Rejected {
            status_code: envelope.status_code,
            message: envelope.status_message.unwrap_or_default(),
        });
    }

    Ok(envelope)
}

/// Parse a single-object payload
pub fn parse_object<T: DeserializeOwned>(response: &TransportResponse) -> Result<T, PayloadError> {
    let data = parse_envelope(response)?
        .data
        .filter(|d| !d.is_null())
        .ok_or(PayloadError::MissingData)?;

    serde_json::from_value(data).map_err(|e| PayloadError::Invalid(e.to_string()))
}

/// Parse a collection payload; any invalid element fails the whole call
pub fn parse_array<T: DeserializeOwned>(
    response: &TransportResponse,
) -> Result<Vec<T>, PayloadError> {
    let items = match parse_envelope(response)?.data {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(PayloadError::NotAnArray),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).map_err(|e| PayloadError::InvalidItem {
                index,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Parse a response that carries no data, only a status
pub fn parse_empty(response: &TransportResponse) -> Result<(), PayloadError> {
    parse_envelope(response).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: String,
    }

    fn ok_body(data: Value) -> TransportResponse {
        let body = serde_json::json!({
            "data": data,
            "status_code": 1000,
            "timestamp": "2024-03-01T08:00:00Z"
        });
        TransportResponse::new(200, serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_success_object() {
        let result: CallResult<Item> =
            classify(Ok(ok_body(serde_json::json!({"id": "LOC1"}))), None, parse_object);

        assert_eq!(result.payload(), Some(&Item { id: "LOC1".into() }));
        assert_eq!(result.meta().unwrap().ocpi_status_code, Some(1000));
    }

    #[test]
    fn test_array_with_bad_element_is_protocol_error() {
        let response = ok_body(serde_json::json!([{"id": "A"}, {"name": "no id"}]));
        let result: CallResult<Vec<Item>> = classify(Ok(response), None, parse_array);

        match result {
            CallResult::ProtocolError { message, detail, .. } => {
                assert!(message.contains("index 1"), "{}", message);
                assert!(detail.unwrap().contains("no id"));
            }
            other => panic!("Expected ProtocolError, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_array_without_data_is_empty() {
        let response = TransportResponse::new(200, r#"{"status_code":1000}"#);
        let result: CallResult<Vec<Item>> = classify(Ok(response), None, parse_array);
        assert_eq!(result.into_payload(), Some(Vec::new()));
    }

    #[test]
    fn test_ocpi_error_status_in_2xx_body() {
        let response = TransportResponse::new(
            200,
            r#"{"status_code":2003,"status_message":"Unknown location"}"#,
        );
        let result: CallResult<Item> = classify(Ok(response), None, parse_object);

        assert_eq!(result.kind(), OutcomeKind::ProtocolError);
        assert!(result.error_message().unwrap().contains("Unknown location"));
    }

    #[test]
    fn test_http_error_carries_status_and_detail() {
        let response = TransportResponse::new(
            404,
            r#"{"status_code":2003,"status_message":"Unknown location"}"#,
        );
        let result: CallResult<Item> = classify(Ok(response), None, parse_object);

        match result {
            CallResult::ProtocolError { message, detail, meta } => {
                assert_eq!(message, "Remote returned HTTP 404: Unknown location");
                assert_eq!(detail.as_deref(), Some("Unknown location"));
                assert_eq!(meta.unwrap().status, 404);
            }
            other => panic!("Expected ProtocolError, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_client_error_hint_is_concatenated() {
        let response = TransportResponse::new(400, r#"{"status_message":"invalid request"}"#);
        let result: CallResult<Item> =
            classify(Ok(response), Some("missing 'date_from' filter"), parse_object);

        let message = result.error_message().unwrap();
        assert!(message.contains("invalid request"));
        assert!(message.contains("missing 'date_from' filter"));
        assert_eq!(result.meta().unwrap().status, 400);
    }

    #[test]
    fn test_hint_ignored_for_server_errors() {
        let response = TransportResponse::new(503, "");
        let result: CallResult<Item> = classify(Ok(response), Some("hint"), parse_object);

        assert_eq!(result.error_message().unwrap(), "Remote returned HTTP 503");
    }

    #[test]
    fn test_transport_failure() {
        let result: CallResult<Item> =
            classify(Err(TransportError::Cancelled), None, parse_object);

        assert_eq!(result.kind(), OutcomeKind::TransportException);
        assert!(result.meta().is_none());
    }

    #[test]
    fn test_pagination_headers() {
        let response = ok_body(serde_json::json!([]))
            .with_header("X-Total-Count", "120")
            .with_header("X-Limit", "50")
            .with_header(
                "Link",
                "<https://cpo.example/ocpi/2.2.1/locations?offset=50&limit=50>; rel=\"next\"",
            );
        let meta = HttpMeta::from_response(&response);

        assert_eq!(meta.total_count, Some(120));
        assert_eq!(meta.limit, Some(50));
        assert_eq!(
            meta.next_link.as_deref(),
            Some("https://cpo.example/ocpi/2.2.1/locations?offset=50&limit=50")
        );
    }

    #[test]
    fn test_into_result() {
        let result: CallResult<Item> = CallResult::no_remote_url();
        match result.into_result() {
            Err(CallError::Protocol { message, status, .. }) => {
                assert_eq!(message, NO_REMOTE_URL);
                assert_eq!(status, None);
            }
            other => panic!("Unexpected {:?}", other),
        }
    }
}

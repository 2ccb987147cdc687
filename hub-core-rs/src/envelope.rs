//! Per-call request context
//!
//! An envelope is assembled once per call from caller-supplied options, with
//! every missing identifier generated and the timeout falling back to the
//! client default. It is never mutated afterwards.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::ids::{CorrelationId, EventTrackingId, IdGenerator, RequestId};

/// Optional per-call overrides supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub request_id: Option<RequestId>,
    pub correlation_id: Option<CorrelationId>,
    pub event_tracking_id: Option<EventTrackingId>,
    pub timeout: Option<Duration>,
    /// Absolute point in time after which the call is abandoned
    pub deadline: Option<Instant>,
    pub cancellation: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<RequestId>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_event_tracking_id(mut self, id: impl Into<EventTrackingId>) -> Self {
        self.event_tracking_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Immutable context of one outbound call
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
    pub event_tracking_id: EventTrackingId,
    pub timeout: Duration,
    pub cancellation: CancellationToken,
    pub created_at: DateTime<Utc>,
}

impl RequestEnvelope {
    /// Build an envelope, generating whatever the caller left out
    pub fn build(
        options: RequestOptions,
        ids: &dyn IdGenerator,
        default_timeout: Duration,
    ) -> Self {
        let mut timeout = options.timeout.unwrap_or(default_timeout);
        if let Some(deadline) = options.deadline {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }

        Self {
            request_id: options.request_id.unwrap_or_else(|| ids.request_id()),
            correlation_id: options
                .correlation_id
                .unwrap_or_else(|| ids.correlation_id()),
            event_tracking_id: options
                .event_tracking_id
                .unwrap_or_else(|| ids.event_tracking_id()),
            timeout,
            cancellation: options.cancellation.unwrap_or_default(),
            created_at: Utc::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

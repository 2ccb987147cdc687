//! Event hook pipeline
//!
//! Observers are notified before every dispatch and after every completion,
//! in registration order, one at a time. An observer that errors or panics is
//! logged and skipped; it never changes the outcome of the call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify::{HttpMeta, OutcomeKind, OutcomeSummary};
use crate::envelope::RequestEnvelope;
use crate::error::HookError;
use crate::types::ModuleTarget;

/// Notification fired before a request is dispatched
#[derive(Debug)]
pub struct RequestEvent<'a> {
    pub timestamp: DateTime<Utc>,
    pub operation: &'static str,
    pub target: &'a ModuleTarget,
    pub envelope: &'a RequestEnvelope,
    pub parameters: &'a Value,
}

/// Notification fired once a call has reached its terminal outcome
#[derive(Debug)]
pub struct ResponseEvent<'a> {
    pub timestamp: DateTime<Utc>,
    pub operation: &'static str,
    pub target: &'a ModuleTarget,
    pub envelope: &'a RequestEnvelope,
    pub parameters: &'a Value,
    pub outcome: &'a OutcomeSummary,
    /// Server diagnostic of a protocol error
    pub detail: Option<&'a str>,
    /// Response metadata; `None` when no response was received
    pub meta: Option<&'a HttpMeta>,
    pub elapsed: Duration,
}

/// Logging/metrics sink notified around every call
#[async_trait]
pub trait CallObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_request(&self, _event: &RequestEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_response(&self, _event: &ResponseEvent<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

#[derive(Clone)]
struct Registration {
    /// `None` observes every operation
    operation: Option<&'static str>,
    observer: Arc<dyn CallObserver>,
}

impl Registration {
    fn wants(&self, operation: &str) -> bool {
        self.operation.map_or(true, |op| op == operation)
    }
}

/// Ordered list of observers
#[derive(Default)]
pub struct HookPipeline {
    observers: RwLock<Vec<Registration>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe every operation
    pub fn register(&self, observer: Arc<dyn CallObserver>) {
        self.observers.write().push(Registration {
            operation: None,
            observer,
        });
    }

    /// Observe a single operation
    pub fn register_for(&self, operation: &'static str, observer: Arc<dyn CallObserver>) {
        self.observers.write().push(Registration {
            operation: Some(operation),
            observer,
        });
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn interested(&self, operation: &str) -> Vec<Registration> {
        self.observers
            .read()
            .iter()
            .filter(|r| r.wants(operation))
            .cloned()
            .collect()
    }

    /// Notify observers of a pending dispatch; returns the number of failures
    pub async fn fire_request(&self, event: &RequestEvent<'_>) -> usize {
        let mut failures = 0;
        for registration in self.interested(event.operation) {
            let observer = &registration.observer;
            let outcome = AssertUnwindSafe(observer.on_request(event))
                .catch_unwind()
                .await;
            if !settle(observer.name(), event.operation, outcome) {
                failures += 1;
            }
        }
        failures
    }

    /// Notify observers of a completed call; returns the number of failures
    pub async fn fire_response(&self, event: &ResponseEvent<'_>) -> usize {
        let mut failures = 0;
        for registration in self.interested(event.operation) {
            let observer = &registration.observer;
            let outcome = AssertUnwindSafe(observer.on_response(event))
                .catch_unwind()
                .await;
            if !settle(observer.name(), event.operation, outcome) {
                failures += 1;
            }
        }
        failures
    }
}

fn settle(
    observer: &str,
    operation: &str,
    outcome: std::thread::Result<Result<(), HookError>>,
) -> bool {
    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Hook for {} ignored: {}", operation, e);
            false
        }
        Err(_) => {
            warn!(
                "Hook for {} ignored: {}",
                operation,
                HookError::Panicked(observer.to_string())
            );
            false
        }
    }
}

/// Observer writing one log line per request and per response
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait]
impl CallObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn on_request(&self, event: &RequestEvent<'_>) -> Result<(), HookError> {
        debug!(
            operation = event.operation,
            target = %event.target,
            request_id = %event.envelope.request_id,
            correlation_id = %event.envelope.correlation_id,
            "dispatching request"
        );
        Ok(())
    }

    async fn on_response(&self, event: &ResponseEvent<'_>) -> Result<(), HookError> {
        let elapsed_ms = u64::try_from(event.elapsed.as_millis()).unwrap_or(u64::MAX);
        match event.outcome.kind {
            OutcomeKind::Success => info!(
                operation = event.operation,
                request_id = %event.envelope.request_id,
                http_status = event.outcome.http_status,
                elapsed_ms,
                "request succeeded"
            ),
            kind => warn!(
                operation = event.operation,
                request_id = %event.envelope.request_id,
                outcome = kind.as_str(),
                http_status = event.outcome.http_status,
                ocpi_status = event.meta.and_then(|m| m.ocpi_status_code),
                detail = event.detail,
                elapsed_ms,
                "request failed: {}",
                event.outcome.message.as_deref().unwrap_or("")
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RequestOptions;
    use crate::ids::SequentialIdGenerator;
    use crate::types::ModuleId;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CallObserver for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_request(&self, event: &RequestEvent<'_>) -> Result<(), HookError> {
            self.log.lock().push(format!("{}:pre:{}", self.name, event.operation));
            Ok(())
        }

        async fn on_response(&self, event: &ResponseEvent<'_>) -> Result<(), HookError> {
            self.log.lock().push(format!("{}:post:{}", self.name, event.operation));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl CallObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_request(&self, _event: &RequestEvent<'_>) -> Result<(), HookError> {
            Err(HookError::Failed {
                observer: "failing".into(),
                message: "sink unavailable".into(),
            })
        }

        async fn on_response(&self, _event: &ResponseEvent<'_>) -> Result<(), HookError> {
            panic!("observer bug");
        }
    }

    fn envelope() -> RequestEnvelope {
        RequestEnvelope::build(
            RequestOptions::new(),
            &SequentialIdGenerator::new("h"),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_observers_run_in_order_and_failures_are_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = HookPipeline::new();
        pipeline.register(Arc::new(Recorder { name: "a".into(), log: log.clone() }));
        pipeline.register(Arc::new(Failing));
        pipeline.register(Arc::new(Recorder { name: "b".into(), log: log.clone() }));

        let target = ModuleTarget::sender(ModuleId::Locations);
        let envelope = envelope();
        let params = Value::Null;
        let request = RequestEvent {
            timestamp: Utc::now(),
            operation: "get_location",
            target: &target,
            envelope: &envelope,
            parameters: &params,
        };
        assert_eq!(pipeline.fire_request(&request).await, 1);

        let outcome = OutcomeSummary {
            kind: OutcomeKind::Success,
            http_status: Some(200),
            message: None,
        };
        let response = ResponseEvent {
            timestamp: Utc::now(),
            operation: "get_location",
            target: &target,
            envelope: &envelope,
            parameters: &params,
            outcome: &outcome,
            detail: None,
            meta: None,
            elapsed: Duration::from_millis(3),
        };
        assert_eq!(pipeline.fire_response(&response).await, 1);

        assert_eq!(
            *log.lock(),
            vec![
                "a:pre:get_location",
                "b:pre:get_location",
                "a:post:get_location",
                "b:post:get_location",
            ]
        );
    }

    #[tokio::test]
    async fn test_operation_scoped_observer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = HookPipeline::new();
        pipeline.register_for(
            "reserve_now",
            Arc::new(Recorder { name: "cmd".into(), log: log.clone() }),
        );

        let target = ModuleTarget::sender(ModuleId::Locations);
        let envelope = envelope();
        let params = Value::Null;
        let event = RequestEvent {
            timestamp: Utc::now(),
            operation: "get_location",
            target: &target,
            envelope: &envelope,
            parameters: &params,
        };
        pipeline.fire_request(&event).await;

        assert!(log.lock().is_empty());
        assert_eq!(pipeline.len(), 1);
    }
}

//! Call executor
//!
//! Every client operation funnels through [`CallExecutor::execute`]:
//!
//! ```text
//! resolve target ─► pre-hook ─► none ─────────────────────► ProtocolError
//!                      │                                        │
//!                      ▼                                        ▼
//!               build request ─► transport ─► classify ─► counters ─► post-hook
//! ```
//!
//! Each call increments the attempt counter and exactly one outcome counter,
//! and fires the pre- and post-dispatch hooks once each, whichever branch it
//! takes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::{classify, CallResult, OutcomeKind};
use crate::counters::ClientCounters;
use crate::directory::EndpointDirectory;
use crate::envelope::{RequestEnvelope, RequestOptions};
use crate::error::{PayloadError, TransportError};
use crate::hooks::{HookPipeline, RequestEvent, ResponseEvent};
use crate::ids::{IdGenerator, RandomIdGenerator};
use crate::transport::{
    Transport, TransportRequest, TransportResponse, CORRELATION_ID_HEADER, DEFAULT_USER_AGENT,
    REQUEST_ID_HEADER,
};
use crate::types::ModuleTarget;

/// Executor-wide settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout applied when the caller does not supply one
    pub default_timeout: Duration,
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// What is being called: operation name, logical target, hook parameters
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub operation: &'static str,
    pub target: ModuleTarget,
    /// Domain parameters handed to observers
    pub parameters: Value,
    /// Appended to 4xx error messages
    pub client_error_hint: Option<String>,
}

impl CallSpec {
    pub fn new(operation: &'static str, target: ModuleTarget) -> Self {
        Self {
            operation,
            target,
            parameters: Value::Null,
            client_error_hint: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_client_error_hint(mut self, hint: impl Into<String>) -> Self {
        self.client_error_hint = Some(hint.into());
        self
    }
}

/// Resolves, dispatches, classifies and instruments outbound calls
pub struct CallExecutor {
    directory: Arc<dyn EndpointDirectory>,
    transport: Arc<dyn Transport>,
    ids: Arc<dyn IdGenerator>,
    hooks: HookPipeline,
    counters: ClientCounters,
    config: ExecutorConfig,
}

impl CallExecutor {
    pub fn new(
        directory: Arc<dyn EndpointDirectory>,
        transport: Arc<dyn Transport>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            directory,
            transport,
            ids: Arc::new(RandomIdGenerator),
            hooks: HookPipeline::new(),
            counters: ClientCounters::new(),
            config,
        }
    }

    /// Replace the identifier source
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    pub fn directory(&self) -> &dyn EndpointDirectory {
        self.directory.as_ref()
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    pub fn counters(&self) -> &ClientCounters {
        &self.counters
    }

    /// Build the per-call envelope from caller options
    pub fn envelope(&self, options: RequestOptions) -> RequestEnvelope {
        RequestEnvelope::build(options, self.ids.as_ref(), self.config.default_timeout)
    }

    /// Run one call through the framework
    ///
    /// `build` receives the resolved base URL; the executor sets the id
    /// headers and the timeout on whatever it returns. A build failure is
    /// classified like a transport failure. `parse` only ever sees 2xx
    /// responses.
    pub async fn execute<T, B, P>(
        &self,
        call: CallSpec,
        envelope: &RequestEnvelope,
        build: B,
        parse: P,
    ) -> CallResult<T>
    where
        B: FnOnce(&str, &RequestEnvelope) -> Result<TransportRequest, TransportError>,
        P: FnOnce(&TransportResponse) -> Result<T, PayloadError>,
    {
        let operation = call.operation;
        let counters = self.counters.for_operation(operation);
        let started = Instant::now();

        counters.attempted();
        counter!("hub_client_requests_total", "operation" => operation).increment(1);

        let base_url = self.directory.resolve(&call.target);

        self.hooks
            .fire_request(&RequestEvent {
                timestamp: Utc::now(),
                operation,
                target: &call.target,
                envelope,
                parameters: &call.parameters,
            })
            .await;

        let result = match base_url {
            None => {
                warn!("{}: no remote URL for {}", operation, call.target);
                counters.failed_locally();
                counter!("hub_client_requests_failed_locally_total", "operation" => operation)
                    .increment(1);
                CallResult::no_remote_url()
            }
            Some(base_url) => {
                let outcome = match build(&base_url, envelope) {
                    Ok(request) => {
                        let request = stamp(request, envelope);
                        debug!(
                            "{}: {} {} (request {})",
                            operation, request.method, request.url, envelope.request_id
                        );
                        self.send(request, envelope).await
                    }
                    Err(e) => {
                        warn!("{}: could not build request: {}", operation, e);
                        Err(e)
                    }
                };
                let result = classify(outcome, call.client_error_hint.as_deref(), parse);

                let outcome_label = if result.is_success() {
                    counters.ok();
                    "ok"
                } else {
                    counters.error();
                    "error"
                };
                counter!(
                    "hub_client_responses_total",
                    "operation" => operation,
                    "outcome" => outcome_label
                )
                .increment(1);
                result
            }
        };

        let elapsed = started.elapsed();
        histogram!("hub_client_request_duration_seconds", "operation" => operation)
            .record(elapsed.as_secs_f64());

        let summary = result.summary();
        if summary.kind == OutcomeKind::TransportException {
            debug!("{}: transport exception after {:?}", operation, elapsed);
        }

        self.hooks
            .fire_response(&ResponseEvent {
                timestamp: Utc::now(),
                operation,
                target: &call.target,
                envelope,
                parameters: &call.parameters,
                outcome: &summary,
                detail: result.detail(),
                meta: result.meta(),
                elapsed,
            })
            .await;

        result
    }

    /// Send honoring the envelope's timeout and cancellation signal
    async fn send(
        &self,
        request: TransportRequest,
        envelope: &RequestEnvelope,
    ) -> Result<TransportResponse, TransportError> {
        let timeout = envelope.timeout;

        if envelope.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        // A deadline already in the past leaves no time for the exchange
        if timeout.is_zero() {
            return Err(TransportError::Timeout(timeout));
        }

        tokio::select! {
            biased;
            _ = envelope.cancellation.cancelled() => Err(TransportError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.transport.send(request)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(timeout)),
                }
            }
        }
    }
}

/// Apply envelope identifiers and timeout to a built request
fn stamp(mut request: TransportRequest, envelope: &RequestEnvelope) -> TransportRequest {
    request.headers.retain(|(name, _)| {
        !name.eq_ignore_ascii_case(REQUEST_ID_HEADER)
            && !name.eq_ignore_ascii_case(CORRELATION_ID_HEADER)
    });
    request
        .headers
        .push((REQUEST_ID_HEADER.to_string(), envelope.request_id.to_string()));
    request.headers.push((
        CORRELATION_ID_HEADER.to_string(),
        envelope.correlation_id.to_string(),
    ));
    request.timeout = envelope.timeout;
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{parse_object, HttpMeta, NO_REMOTE_URL};
    use crate::directory::StaticDirectory;
    use crate::error::HookError;
    use crate::hooks::CallObserver;
    use crate::ids::SequentialIdGenerator;
    use crate::testing::MockTransport;
    use crate::transport::Method;
    use crate::types::{InterfaceRole, ModuleId, ProtocolVersion};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Events {
        log: Mutex<Vec<String>>,
        /// Detail and metadata handed to `on_response`
        responses: Mutex<Vec<(Option<String>, Option<HttpMeta>)>>,
    }

    #[async_trait]
    impl CallObserver for Events {
        fn name(&self) -> &str {
            "events"
        }

        async fn on_request(&self, event: &RequestEvent<'_>) -> Result<(), HookError> {
            self.log.lock().push(format!("pre:{}", event.operation));
            Ok(())
        }

        async fn on_response(&self, event: &ResponseEvent<'_>) -> Result<(), HookError> {
            self.log
                .lock()
                .push(format!("post:{}:{}", event.operation, event.outcome.kind.as_str()));
            self.responses
                .lock()
                .push((event.detail.map(str::to_string), event.meta.cloned()));
            Ok(())
        }
    }

    fn directory() -> Arc<StaticDirectory> {
        Arc::new(StaticDirectory::new().with_endpoint(
            ModuleId::Locations,
            InterfaceRole::Sender,
            ProtocolVersion::V2_2_1,
            "https://cpo.example/ocpi/2.2.1/locations",
        ))
    }

    fn executor(directory: Arc<StaticDirectory>, transport: Arc<MockTransport>) -> CallExecutor {
        CallExecutor::new(directory, transport, ExecutorConfig::default())
            .with_id_generator(Arc::new(SequentialIdGenerator::new("x")))
    }

    fn get(
        path: &'static str,
    ) -> impl FnOnce(&str, &RequestEnvelope) -> Result<TransportRequest, TransportError> {
        move |base: &str, _: &RequestEnvelope| {
            Ok(TransportRequest::new(Method::GET, format!("{}{}", base, path)))
        }
    }

    #[tokio::test]
    async fn test_unresolved_target_skips_transport() {
        let transport = Arc::new(MockTransport::new());
        let executor = executor(Arc::new(StaticDirectory::new()), transport.clone());
        let events = Arc::new(Events::default());
        executor.hooks().register(events.clone());

        let envelope = executor.envelope(RequestOptions::new());
        let result: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                get("/LOC1"),
                parse_object,
            )
            .await;

        assert_eq!(result.error_message().as_deref(), Some(NO_REMOTE_URL));
        assert!(transport.requests().is_empty());

        let counters = executor.counters().get("get_location");
        assert_eq!(counters.requests_failed_locally, 1);
        assert_eq!(counters.requests_attempted, 1);
        assert_eq!(counters.responses_ok + counters.responses_error, 0);
        assert_eq!(
            *events.log.lock(),
            vec!["pre:get_location", "post:get_location:protocol_error"]
        );
    }

    #[tokio::test]
    async fn test_success_sets_headers_and_counts() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, serde_json::json!({"data": {"id": "LOC1"}, "status_code": 1000}));
        let executor = executor(directory(), transport.clone());

        let options = RequestOptions::new().with_timeout(Duration::from_secs(3));
        let envelope = executor.envelope(options);
        let result: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                get("/LOC1"),
                parse_object,
            )
            .await;

        assert!(result.is_success());
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://cpo.example/ocpi/2.2.1/locations/LOC1");
        assert_eq!(requests[0].header(REQUEST_ID_HEADER), Some(envelope.request_id.as_str()));
        assert_eq!(
            requests[0].header(CORRELATION_ID_HEADER),
            Some(envelope.correlation_id.as_str())
        );
        assert_eq!(requests[0].timeout, Duration::from_secs(3));

        let counters = executor.counters().get("get_location");
        assert_eq!(counters.requests_attempted, 1);
        assert_eq!(counters.responses_ok, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_counts_as_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TransportResponse::new(200, "not json")));
        let executor = executor(directory(), transport);

        let envelope = executor.envelope(RequestOptions::new());
        let result: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                get("/LOC1"),
                parse_object,
            )
            .await;

        match result {
            CallResult::ProtocolError { detail, .. } => {
                assert_eq!(detail.as_deref(), Some("not json"))
            }
            other => panic!("Expected ProtocolError, got {:?}", other.kind()),
        }
        assert_eq!(executor.counters().get("get_location").responses_error, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_transport_exception() {
        let transport = Arc::new(MockTransport::new().with_delay(Duration::from_millis(200)));
        transport.push_json(200, serde_json::json!({"status_code": 1000}));
        let executor = executor(directory(), transport);

        let options = RequestOptions::new().with_timeout(Duration::from_millis(20));
        let envelope = executor.envelope(options);
        let result: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                get("/LOC1"),
                parse_object,
            )
            .await;

        match result {
            CallResult::TransportException { cause } => assert!(cause.is_timeout()),
            other => panic!("Expected TransportException, got {:?}", other.kind()),
        }
        assert_eq!(executor.counters().get("get_location").responses_error, 1);
    }

    #[tokio::test]
    async fn test_cancellation_still_fires_post_hook() {
        let transport = Arc::new(MockTransport::new().with_delay(Duration::from_secs(5)));
        transport.push_json(200, serde_json::json!({"status_code": 1000}));
        let executor = executor(directory(), transport);
        let events = Arc::new(Events::default());
        executor.hooks().register(events.clone());

        let token = CancellationToken::new();
        let envelope = executor.envelope(RequestOptions::new().with_cancellation(token.clone()));
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                get("/LOC1"),
                parse_object,
            )
            .await;
        canceller.await.unwrap();

        match result {
            CallResult::TransportException { cause } => assert!(cause.is_cancelled()),
            other => panic!("Expected TransportException, got {:?}", other.kind()),
        }
        assert_eq!(executor.counters().get("get_location").responses_error, 1);
        assert_eq!(
            events.log.lock().last().map(String::as_str),
            Some("post:get_location:transport_exception")
        );
    }

    #[tokio::test]
    async fn test_caller_headers_are_replaced_by_envelope() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, serde_json::json!({"data": {}, "status_code": 1000}));
        let executor = executor(directory(), transport.clone());

        let envelope = executor.envelope(RequestOptions::new().with_request_id("real"));
        let _: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                |base, _| {
                    let request = TransportRequest::new(Method::GET, base);
                    Ok(request.with_header("x-request-id", "stale"))
                },
                parse_object,
            )
            .await;

        let requests = transport.requests();
        let ids: Vec<_> = requests[0]
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(REQUEST_ID_HEADER))
            .collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].1, "real");
    }

    #[tokio::test]
    async fn test_build_failure_is_classified() {
        let transport = Arc::new(MockTransport::new());
        let executor = executor(directory(), transport.clone());
        let events = Arc::new(Events::default());
        executor.hooks().register(events.clone());

        let envelope = executor.envelope(RequestOptions::new());
        let result: CallResult<Value> = executor
            .execute(
                CallSpec::new("put_token", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                |_, _| Err(TransportError::InvalidRequest("unencodable body".into())),
                parse_object,
            )
            .await;

        assert_eq!(result.kind(), OutcomeKind::TransportException);
        assert!(transport.requests().is_empty());
        assert_eq!(executor.counters().get("put_token").responses_error, 1);
        assert_eq!(events.log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_deadline_is_not_dispatched() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, serde_json::json!({"data": {}, "status_code": 1000}));
        let executor = executor(directory(), transport.clone());

        let deadline = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        let envelope = executor.envelope(RequestOptions::new().with_deadline(deadline));
        assert!(envelope.timeout.is_zero());

        let result: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                get("/LOC1"),
                parse_object,
            )
            .await;

        match result {
            CallResult::TransportException { cause } => assert!(cause.is_timeout()),
            other => panic!("Expected TransportException, got {:?}", other.kind()),
        }
        assert!(transport.requests().is_empty());
        assert_eq!(executor.counters().get("get_location").responses_error, 1);
    }

    #[tokio::test]
    async fn test_observer_sees_server_detail_and_meta() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Ok(TransportResponse::new(
            404,
            r#"{"status_code":2003,"status_message":"Unknown location"}"#,
        )
        .with_header("X-Total-Count", "0")));
        let executor = executor(directory(), transport);
        let events = Arc::new(Events::default());
        executor.hooks().register(events.clone());

        let envelope = executor.envelope(RequestOptions::new());
        let _: CallResult<Value> = executor
            .execute(
                CallSpec::new("get_location", ModuleTarget::sender(ModuleId::Locations)),
                &envelope,
                get("/LOC9"),
                parse_object,
            )
            .await;

        let responses = events.responses.lock();
        assert_eq!(responses.len(), 1);
        let (detail, meta) = &responses[0];
        assert_eq!(detail.as_deref(), Some("Unknown location"));
        let meta = meta.as_ref().unwrap();
        assert_eq!(meta.status, 404);
        assert_eq!(meta.ocpi_status_code, Some(2003));
        assert_eq!(meta.total_count, Some(0));
    }
}

//! Command dispatch
//!
//! ```text
//! new CommandId ─► Command{callback URL} ─► ledger upsert ─► POST /<KEYWORD>
//!                                                                 │
//!                         ledger ack (any outcome) ◄──────────────┘
//! ```
//!
//! The ledger entry exists before the request leaves, so a result posted
//! back faster than the acknowledgement still finds it.

use chrono::{DateTime, Utc};
use hub_core::classify::parse_object;
use hub_core::transport::Method;
use hub_core::{
    CallExecutor, CallResult, CallSpec, CommandId, CommandLedger, CorrelationId, InterfaceRole,
    ModuleId, ModuleTarget, OutcomeSummary, ProtocolVersion, RequestEnvelope, RequestId,
    TransportRequest,
};
use serde::Serialize;
use tracing::{debug, info};

use super::callback::callback_url;
use crate::ocpi::{CommandKind, CommandParams, CommandResponse, CommandResult};

/// A command as sent upstream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub id: CommandId,
    pub kind: CommandKind,
    pub callback_url: String,
    pub params: CommandParams,
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
}

/// Request body: the parameters plus `response_url`
#[derive(Debug, Serialize)]
pub struct CommandBody<'a> {
    pub response_url: &'a str,
    #[serde(flatten)]
    pub params: &'a CommandParams,
}

impl Command {
    pub fn body(&self) -> CommandBody<'_> {
        CommandBody {
            response_url: &self.callback_url,
            params: &self.params,
        }
    }
}

/// Synchronous outcome of a dispatch, as stored in the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckRecord {
    pub outcome: OutcomeSummary,
    /// Receiver's acknowledgement body, when the exchange succeeded
    pub response: Option<CommandResponse>,
    pub received_at: DateTime<Utc>,
}

pub type HubCommandLedger = CommandLedger<Command, AckRecord, CommandResult>;

/// Where callbacks point and which version/role they name
#[derive(Debug, Clone)]
pub(crate) struct CallbackSettings<'a> {
    /// Configured base; falls back to the resolved commands endpoint
    pub base: Option<&'a str>,
    pub version: ProtocolVersion,
    pub role_segment: &'a str,
}

/// Send one command and record it in the ledger
pub(crate) async fn dispatch(
    executor: &CallExecutor,
    ledger: &HubCommandLedger,
    callbacks: CallbackSettings<'_>,
    params: CommandParams,
    envelope: &RequestEnvelope,
) -> (Command, CallResult<CommandResponse>) {
    let kind = params.kind();
    let target = ModuleTarget::new(ModuleId::Commands, InterfaceRole::Receiver)
        .with_version(callbacks.version);

    let id = executor.ids().command_id();
    let resolved = executor.directory().resolve(&target);
    let base = callbacks.base.or(resolved.as_deref()).unwrap_or_default();

    let command = Command {
        callback_url: callback_url(base, callbacks.version, callbacks.role_segment, kind, &id),
        id,
        kind,
        params,
        request_id: envelope.request_id.clone(),
        correlation_id: envelope.correlation_id.clone(),
    };

    let inserted = ledger.upsert(command.id.clone(), || command.clone(), |_| command.clone());
    debug!(
        "Dispatching {} {} ({})",
        kind,
        command.id,
        if inserted { "new" } else { "re-dispatch" }
    );

    let call = CallSpec::new(kind.operation(), target).with_parameters(serde_json::json!({
        "command_id": command.id,
        "callback_url": command.callback_url,
    }));

    let result = executor
        .execute(
            call,
            envelope,
            |base, _| {
                TransportRequest::new(Method::POST, format!("{}/{}", base, kind.keyword()))
                    .with_body(&command.body())
            },
            parse_object::<CommandResponse>,
        )
        .await;

    ledger.record_ack(
        &command.id,
        AckRecord {
            outcome: result.summary(),
            response: result.payload().cloned(),
            received_at: Utc::now(),
        },
    );

    if let Some(response) = result.payload() {
        info!("{} {} acknowledged: {:?}", kind, command.id, response.result);
    }

    (command, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hub_core::ids::SequentialIdGenerator;
    use hub_core::testing::MockTransport;
    use hub_core::{ExecutorConfig, OutcomeKind, RequestOptions, StaticDirectory};

    use crate::ocpi::{CommandResultType, StopSession};

    fn executor(directory: StaticDirectory, transport: Arc<MockTransport>) -> CallExecutor {
        CallExecutor::new(Arc::new(directory), transport, ExecutorConfig::default())
            .with_id_generator(Arc::new(SequentialIdGenerator::new("t")))
    }

    fn settings() -> CallbackSettings<'static> {
        CallbackSettings {
            base: Some("https://hub.example/ocpi/commands"),
            version: ProtocolVersion::V2_2_1,
            role_segment: "receiver",
        }
    }

    fn stop() -> CommandParams {
        StopSession {
            session_id: "SES1".into(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_dispatch_records_command_even_without_endpoint() {
        let transport = Arc::new(MockTransport::new());
        let executor = executor(StaticDirectory::new(), transport.clone());
        let ledger = HubCommandLedger::new();
        let envelope = executor.envelope(RequestOptions::new());

        let (command, result) = dispatch(&executor, &ledger, settings(), stop(), &envelope).await;

        assert_eq!(result.kind(), OutcomeKind::ProtocolError);
        assert!(transport.requests().is_empty());

        let record = ledger.try_get(&command.id).unwrap();
        assert_eq!(record.upstream, command);
        assert_eq!(record.ack.unwrap().outcome.kind, OutcomeKind::ProtocolError);
        assert!(record.final_result.is_none());
        assert!(command
            .callback_url
            .ends_with(&format!("/2.2.1/receiver/STOP_SESSION/{}", command.id)));
    }

    #[tokio::test]
    async fn test_dispatch_sends_body_with_response_url() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            serde_json::json!({"data": {"result": "ACCEPTED", "timeout": 30}, "status_code": 1000}),
        );
        let directory = StaticDirectory::new().with_endpoint(
            ModuleId::Commands,
            InterfaceRole::Receiver,
            ProtocolVersion::V2_2_1,
            "https://cpo.example/ocpi/2.2.1/commands",
        );
        let executor = executor(directory, transport.clone());
        let ledger = HubCommandLedger::new();
        let envelope = executor.envelope(RequestOptions::new());

        let (command, result) = dispatch(&executor, &ledger, settings(), stop(), &envelope).await;
        assert!(result.is_success());

        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://cpo.example/ocpi/2.2.1/commands/STOP_SESSION");
        assert_eq!(
            requests[0].body,
            Some(serde_json::json!({
                "response_url": command.callback_url,
                "session_id": "SES1"
            }))
        );

        assert!(ledger.complete_with(&command.id, CommandResult::new(CommandResultType::Accepted)));
        let record = ledger.try_get(&command.id).unwrap();
        assert!(record.ack.unwrap().response.is_some());
        assert!(record.final_result.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn test_callback_falls_back_to_commands_endpoint() {
        let transport = Arc::new(MockTransport::new());
        let directory = StaticDirectory::new().with_endpoint(
            ModuleId::Commands,
            InterfaceRole::Receiver,
            ProtocolVersion::V2_2_1,
            "https://cpo.example/ocpi/commands",
        );
        let executor = executor(directory, transport);
        let ledger = HubCommandLedger::new();
        let envelope = executor.envelope(RequestOptions::new());

        let callbacks = CallbackSettings {
            base: None,
            ..settings()
        };
        let (command, _) = dispatch(&executor, &ledger, callbacks, stop(), &envelope).await;

        assert!(command
            .callback_url
            .starts_with("https://cpo.example/ocpi/commands/2.2.1/receiver/STOP_SESSION/"));
        assert_eq!(command.request_id, envelope.request_id);
    }
}

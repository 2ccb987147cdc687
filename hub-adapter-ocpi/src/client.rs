//! OCPI hub client
//!
//! Every operation is configuration for the shared executor: a target, a
//! request builder and a payload parser. Commands additionally go through the
//! ledger-backed dispatcher.
//!
//! ## Operations
//!
//! | Module | Remote role | Operations |
//! |--------|-------------|------------|
//! | Locations | SENDER | `get_locations`, `get_location`, `get_evse`, `get_connector` |
//! | Tariffs | SENDER | `get_tariffs` |
//! | Sessions | SENDER | `get_sessions`, `set_charging_preferences` |
//! | CDRs | SENDER | `get_cdrs` |
//! | Tokens | RECEIVER | `get_token`, `put_token`, `patch_token` |
//! | Tokens | SENDER | `get_tokens`, `authorize_token` |
//! | Locations | RECEIVER | `put_location` |
//! | Sessions | RECEIVER | `put_session` |
//! | CDRs | RECEIVER | `post_cdr` |
//! | Tariffs | RECEIVER | `put_tariff` |
//! | Commands | RECEIVER | `reserve_now`, `cancel_reservation`, `start_session` |
//! | Commands | RECEIVER | `stop_session`, `unlock_connector` |

use std::collections::BTreeMap;
use std::sync::Arc;

use hub_core::classify::{parse_array, parse_empty, parse_object};
use hub_core::transport::Method;
use hub_core::{
    CallExecutor, CallObserver, CallResult, CallSpec, CommandCompletion, CommandId,
    CounterSnapshot, EndpointDirectory, HookPipeline, HttpTransport, IdGenerator, InterfaceRole,
    ListFilter, ModuleId, ModuleTarget, PayloadError, RequestEnvelope, RequestOptions,
    StaticDirectory, Transport, TransportError, TransportRequest, TransportResponse,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::command::dispatch::{dispatch, CallbackSettings};
use crate::command::{parse_callback, CallbackError, Command, HubCommandLedger};
use crate::config::{ClientConfig, ConfigError};
use crate::ocpi::{
    AuthorizationInfo, CancelReservation, Cdr, ChargingPreferences, ChargingPreferencesResponse,
    CommandParams, CommandResponse, CommandResult, Connector, Evse, Location, LocationReferences,
    ReserveNow, Session, StartSession, StopSession, Tariff, Token, TokenType, UnlockConnector,
};

/// Appended to the error of a rejected session listing without `date_from`
pub const MISSING_DATE_FROM_HINT: &str =
    "the mandatory 'date_from' filter was not supplied and is the likely cause";

/// Identifies a token at a tokens receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenKey<'a> {
    pub country_code: &'a str,
    pub party_id: &'a str,
    pub uid: &'a str,
    pub token_type: TokenType,
}

impl<'a> TokenKey<'a> {
    pub fn of(token: &'a Token) -> Self {
        Self {
            country_code: &token.country_code,
            party_id: &token.party_id,
            uid: &token.uid,
            token_type: token.token_type,
        }
    }
}

/// Outbound OCPI client of the hub
pub struct HubClient {
    config: ClientConfig,
    executor: CallExecutor,
    ledger: Arc<HubCommandLedger>,
}

impl HubClient {
    pub fn builder(config: ClientConfig) -> HubClientBuilder {
        HubClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookPipeline {
        self.executor.hooks()
    }

    pub fn ledger(&self) -> &Arc<HubCommandLedger> {
        &self.ledger
    }

    /// Snapshot of every operation's counters
    pub fn counters(&self) -> BTreeMap<&'static str, CounterSnapshot> {
        self.executor.counters().snapshot()
    }

    /// Counters of one operation
    pub fn operation_counters(&self, operation: &str) -> CounterSnapshot {
        self.executor.counters().get(operation)
    }

    /// Start the ledger sweeper when retention is configured
    pub fn start_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let policy = self.config.retention?;
        info!(
            "Ledger sweeper every {:?} ({:?})",
            self.config.sweep_interval, policy
        );
        Some(HubCommandLedger::spawn_sweeper(
            self.ledger.clone(),
            policy,
            self.config.sweep_interval,
            cancel,
        ))
    }

    fn sender(&self, module: ModuleId) -> ModuleTarget {
        ModuleTarget::new(module, InterfaceRole::Sender).with_version(self.config.version)
    }

    fn receiver(&self, module: ModuleId) -> ModuleTarget {
        ModuleTarget::new(module, InterfaceRole::Receiver).with_version(self.config.version)
    }

    async fn run<T, B, P>(
        &self,
        call: CallSpec,
        options: RequestOptions,
        build: B,
        parse: P,
    ) -> CallResult<T>
    where
        B: FnOnce(&str, &RequestEnvelope) -> Result<TransportRequest, TransportError>,
        P: FnOnce(&TransportResponse) -> Result<T, PayloadError>,
    {
        let envelope = self.executor.envelope(options);
        self.executor.execute(call, &envelope, build, parse).await
    }

    async fn get_one<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        target: ModuleTarget,
        segments: Vec<&str>,
        query: Vec<(&'static str, &str)>,
        options: RequestOptions,
    ) -> CallResult<T> {
        let call = CallSpec::new(operation, target).with_parameters(json!({
            "path": segments,
            "query": query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }));

        self.run(
            call,
            options,
            |base, _| Ok(TransportRequest::new(Method::GET, endpoint(base, &segments, &query)?)),
            parse_object,
        )
        .await
    }

    async fn list<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        target: ModuleTarget,
        filter: ListFilter,
        client_error_hint: Option<&str>,
        options: RequestOptions,
    ) -> CallResult<Vec<T>> {
        let mut call = CallSpec::new(operation, target)
            .with_parameters(json!({ "filter": filter.to_query_string() }));
        if let Some(hint) = client_error_hint {
            call = call.with_client_error_hint(hint);
        }

        self.run(
            call,
            options,
            move |base, _| Ok(TransportRequest::new(Method::GET, filter.apply_to(base))),
            parse_array,
        )
        .await
    }

    async fn push<B, T>(
        &self,
        operation: &'static str,
        target: ModuleTarget,
        method: Method,
        segments: Vec<&str>,
        query: Vec<(&'static str, &str)>,
        body: &B,
        options: RequestOptions,
        parse: impl FnOnce(&TransportResponse) -> Result<T, PayloadError>,
    ) -> CallResult<T>
    where
        B: serde::Serialize + ?Sized,
    {
        let call = CallSpec::new(operation, target).with_parameters(json!({ "path": segments }));

        self.run(
            call,
            options,
            |base, _| {
                TransportRequest::new(method, endpoint(base, &segments, &query)?).with_body(body)
            },
            parse,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Locations (remote SENDER)
    // ------------------------------------------------------------------

    pub async fn get_locations(
        &self,
        filter: ListFilter,
        options: RequestOptions,
    ) -> CallResult<Vec<Location>> {
        self.list("get_locations", self.sender(ModuleId::Locations), filter, None, options)
            .await
    }

    pub async fn get_location(
        &self,
        location_id: &str,
        options: RequestOptions,
    ) -> CallResult<Location> {
        self.get_one(
            "get_location",
            self.sender(ModuleId::Locations),
            vec![location_id],
            Vec::new(),
            options,
        )
        .await
    }

    pub async fn get_evse(
        &self,
        location_id: &str,
        evse_uid: &str,
        options: RequestOptions,
    ) -> CallResult<Evse> {
        self.get_one(
            "get_evse",
            self.sender(ModuleId::Locations),
            vec![location_id, evse_uid],
            Vec::new(),
            options,
        )
        .await
    }

    pub async fn get_connector(
        &self,
        location_id: &str,
        evse_uid: &str,
        connector_id: &str,
        options: RequestOptions,
    ) -> CallResult<Connector> {
        self.get_one(
            "get_connector",
            self.sender(ModuleId::Locations),
            vec![location_id, evse_uid, connector_id],
            Vec::new(),
            options,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Tariffs, sessions, CDRs (remote SENDER)
    // ------------------------------------------------------------------

    pub async fn get_tariffs(
        &self,
        filter: ListFilter,
        options: RequestOptions,
    ) -> CallResult<Vec<Tariff>> {
        self.list("get_tariffs", self.sender(ModuleId::Tariffs), filter, None, options)
            .await
    }

    /// List sessions; a 4xx without `date_from` names the missing filter
    pub async fn get_sessions(
        &self,
        filter: ListFilter,
        options: RequestOptions,
    ) -> CallResult<Vec<Session>> {
        let hint = filter.from.is_none().then_some(MISSING_DATE_FROM_HINT);
        self.list("get_sessions", self.sender(ModuleId::Sessions), filter, hint, options)
            .await
    }

    pub async fn set_charging_preferences(
        &self,
        session_id: &str,
        preferences: &ChargingPreferences,
        options: RequestOptions,
    ) -> CallResult<ChargingPreferencesResponse> {
        self.push(
            "set_charging_preferences",
            self.sender(ModuleId::Sessions),
            Method::PUT,
            vec![session_id, "charging_preferences"],
            Vec::new(),
            preferences,
            options,
            parse_object,
        )
        .await
    }

    pub async fn get_cdrs(
        &self,
        filter: ListFilter,
        options: RequestOptions,
    ) -> CallResult<Vec<Cdr>> {
        self.list("get_cdrs", self.sender(ModuleId::Cdrs), filter, None, options)
            .await
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Read a token back from the tokens receiver
    pub async fn get_token(&self, key: TokenKey<'_>, options: RequestOptions) -> CallResult<Token> {
        self.get_one(
            "get_token",
            self.receiver(ModuleId::Tokens),
            vec![key.country_code, key.party_id, key.uid],
            vec![("type", key.token_type.as_str())],
            options,
        )
        .await
    }

    pub async fn put_token(&self, token: &Token, options: RequestOptions) -> CallResult<()> {
        let key = TokenKey::of(token);
        self.push(
            "put_token",
            self.receiver(ModuleId::Tokens),
            Method::PUT,
            vec![key.country_code, key.party_id, key.uid],
            vec![("type", key.token_type.as_str())],
            token,
            options,
            parse_empty,
        )
        .await
    }

    /// Partial update; `patch` must carry `last_updated`
    pub async fn patch_token(
        &self,
        key: TokenKey<'_>,
        patch: &Value,
        options: RequestOptions,
    ) -> CallResult<()> {
        self.push(
            "patch_token",
            self.receiver(ModuleId::Tokens),
            Method::PATCH,
            vec![key.country_code, key.party_id, key.uid],
            vec![("type", key.token_type.as_str())],
            patch,
            options,
            parse_empty,
        )
        .await
    }

    pub async fn get_tokens(
        &self,
        filter: ListFilter,
        options: RequestOptions,
    ) -> CallResult<Vec<Token>> {
        self.list("get_tokens", self.sender(ModuleId::Tokens), filter, None, options)
            .await
    }

    /// Real-time authorization against the token owner
    pub async fn authorize_token(
        &self,
        uid: &str,
        token_type: TokenType,
        location: Option<&LocationReferences>,
        options: RequestOptions,
    ) -> CallResult<AuthorizationInfo> {
        let call = CallSpec::new("authorize_token", self.sender(ModuleId::Tokens))
            .with_parameters(json!({ "uid": uid, "type": token_type.as_str() }));

        self.run(
            call,
            options,
            |base, _| {
                let url = endpoint(base, &[uid, "authorize"], &[("type", token_type.as_str())])?;
                let request = TransportRequest::new(Method::POST, url);
                match location {
                    Some(location) => request.with_body(location),
                    None => Ok(request),
                }
            },
            parse_object,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Pushes to the remote RECEIVER
    // ------------------------------------------------------------------

    pub async fn put_location(
        &self,
        location: &Location,
        options: RequestOptions,
    ) -> CallResult<()> {
        self.push(
            "put_location",
            self.receiver(ModuleId::Locations),
            Method::PUT,
            vec![
                location.country_code.as_str(),
                location.party_id.as_str(),
                location.id.as_str(),
            ],
            Vec::new(),
            location,
            options,
            parse_empty,
        )
        .await
    }

    pub async fn put_session(&self, session: &Session, options: RequestOptions) -> CallResult<()> {
        self.push(
            "put_session",
            self.receiver(ModuleId::Sessions),
            Method::PUT,
            vec![session.country_code.as_str(), session.party_id.as_str(), session.id.as_str()],
            Vec::new(),
            session,
            options,
            parse_empty,
        )
        .await
    }

    pub async fn post_cdr(&self, cdr: &Cdr, options: RequestOptions) -> CallResult<()> {
        self.push(
            "post_cdr",
            self.receiver(ModuleId::Cdrs),
            Method::POST,
            Vec::new(),
            Vec::new(),
            cdr,
            options,
            parse_empty,
        )
        .await
    }

    pub async fn put_tariff(&self, tariff: &Tariff, options: RequestOptions) -> CallResult<()> {
        self.push(
            "put_tariff",
            self.receiver(ModuleId::Tariffs),
            Method::PUT,
            vec![tariff.country_code.as_str(), tariff.party_id.as_str(), tariff.id.as_str()],
            Vec::new(),
            tariff,
            options,
            parse_empty,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Commands (remote RECEIVER)
    // ------------------------------------------------------------------

    /// Dispatch any command; the ledger holds it before the request leaves
    pub async fn send_command(
        &self,
        params: CommandParams,
        options: RequestOptions,
    ) -> (Command, CallResult<CommandResponse>) {
        let envelope = self.executor.envelope(options);
        let callbacks = CallbackSettings {
            base: self.config.callback_base_url.as_deref(),
            version: self.config.version,
            role_segment: &self.config.receiver_role_segment,
        };

        dispatch(&self.executor, &self.ledger, callbacks, params, &envelope).await
    }

    pub async fn reserve_now(
        &self,
        params: ReserveNow,
        options: RequestOptions,
    ) -> (Command, CallResult<CommandResponse>) {
        self.send_command(params.into(), options).await
    }

    pub async fn cancel_reservation(
        &self,
        params: CancelReservation,
        options: RequestOptions,
    ) -> (Command, CallResult<CommandResponse>) {
        self.send_command(params.into(), options).await
    }

    pub async fn start_session(
        &self,
        params: StartSession,
        options: RequestOptions,
    ) -> (Command, CallResult<CommandResponse>) {
        self.send_command(params.into(), options).await
    }

    pub async fn stop_session(
        &self,
        params: StopSession,
        options: RequestOptions,
    ) -> (Command, CallResult<CommandResponse>) {
        self.send_command(params.into(), options).await
    }

    pub async fn unlock_connector(
        &self,
        params: UnlockConnector,
        options: RequestOptions,
    ) -> (Command, CallResult<CommandResponse>) {
        self.send_command(params.into(), options).await
    }

    /// Record the asynchronous result of a command
    pub fn complete_command(&self, command_id: &CommandId, result: CommandResult) -> bool {
        self.ledger.complete_with(command_id, result)
    }

    /// Record a result posted to a callback URL
    ///
    /// `Ok(false)` when the command is unknown, already complete, or was
    /// dispatched as a different kind.
    pub fn complete_from_callback(
        &self,
        callback: &str,
        result: CommandResult,
    ) -> Result<bool, CallbackError> {
        let (kind, command_id) = parse_callback(callback)?;

        if let Some(record) = self.ledger.try_get(&command_id) {
            if record.upstream.kind != kind {
                warn!(
                    "Callback for {} names {}, but it was dispatched as {}",
                    command_id, kind, record.upstream.kind
                );
                return Ok(false);
            }
        }

        Ok(self.complete_command(&command_id, result))
    }
}

impl CommandCompletion<CommandResult> for HubClient {
    fn complete_command(&self, command_id: &CommandId, result: CommandResult) -> bool {
        HubClient::complete_command(self, command_id, result)
    }
}

/// Percent-encode `segments` onto `base` and append `query`
fn endpoint(
    base: &str,
    segments: &[&str],
    query: &[(&str, &str)],
) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidRequest(reason);
    let mut url =
        Url::parse(base).map_err(|e| invalid(format!("Invalid base URL '{}': {}", base, e)))?;

    url.path_segments_mut()
        .map_err(|_| invalid(format!("Base URL '{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    Ok(url.into())
}

/// Builder for [`HubClient`]
pub struct HubClientBuilder {
    config: ClientConfig,
    directory: Option<Arc<dyn EndpointDirectory>>,
    transport: Option<Arc<dyn Transport>>,
    ids: Option<Arc<dyn IdGenerator>>,
    observers: Vec<Arc<dyn CallObserver>>,
}

impl HubClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            directory: None,
            transport: None,
            ids: None,
            observers: Vec::new(),
        }
    }

    pub fn directory(mut self, directory: Arc<dyn EndpointDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Defaults to an [`HttpTransport`] built from the config
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<HubClient, ConfigError> {
        self.config.validate()?;

        let directory: Arc<dyn EndpointDirectory> = match self.directory {
            Some(directory) => directory,
            None => Arc::new(StaticDirectory::new()),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                self.config.token.clone(),
                &self.config.user_agent,
            )?),
        };

        let mut executor = CallExecutor::new(directory, transport, self.config.executor_config());
        if let Some(ids) = self.ids {
            executor = executor.with_id_generator(ids);
        }
        for observer in self.observers {
            executor.hooks().register(observer);
        }

        info!("Hub client ready (OCPI {})", self.config.version);

        Ok(HubClient {
            config: self.config,
            executor,
            ledger: Arc::new(HubCommandLedger::new()),
        })
    }
}

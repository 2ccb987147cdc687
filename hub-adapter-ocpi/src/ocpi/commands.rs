//! OCPI command payloads
//!
//! The receiver acknowledges a command synchronously with a
//! [`CommandResponse`] and later posts a [`CommandResult`] to the
//! `response_url` the hub embedded in the request.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{DisplayText, Token};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown command keyword: {0}")]
pub struct UnknownCommand(pub String);

/// The five asynchronous commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    ReserveNow,
    CancelReservation,
    StartSession,
    StopSession,
    UnlockConnector,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::ReserveNow,
        CommandKind::CancelReservation,
        CommandKind::StartSession,
        CommandKind::StopSession,
        CommandKind::UnlockConnector,
    ];

    /// Keyword used in the URL path
    pub fn keyword(&self) -> &'static str {
        match self {
            CommandKind::ReserveNow => "RESERVE_NOW",
            CommandKind::CancelReservation => "CANCEL_RESERVATION",
            CommandKind::StartSession => "START_SESSION",
            CommandKind::StopSession => "STOP_SESSION",
            CommandKind::UnlockConnector => "UNLOCK_CONNECTOR",
        }
    }

    /// Client operation name used for counters and hooks
    pub fn operation(&self) -> &'static str {
        match self {
            CommandKind::ReserveNow => "reserve_now",
            CommandKind::CancelReservation => "cancel_reservation",
            CommandKind::StartSession => "start_session",
            CommandKind::StopSession => "stop_session",
            CommandKind::UnlockConnector => "unlock_connector",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for CommandKind {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.keyword() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

// ============================================================================
// Requests (without response_url, which the hub fills in)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveNow {
    pub token: Token,
    pub expiry_date: DateTime<Utc>,
    pub reservation_id: String,
    pub location_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReservation {
    pub reservation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSession {
    pub token: Token,
    pub location_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSession {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockConnector {
    pub location_id: String,
    pub evse_uid: String,
    pub connector_id: String,
}

/// Parameters of any command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandParams {
    ReserveNow(ReserveNow),
    CancelReservation(CancelReservation),
    StartSession(StartSession),
    StopSession(StopSession),
    UnlockConnector(UnlockConnector),
}

impl CommandParams {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandParams::ReserveNow(_) => CommandKind::ReserveNow,
            CommandParams::CancelReservation(_) => CommandKind::CancelReservation,
            CommandParams::StartSession(_) => CommandKind::StartSession,
            CommandParams::StopSession(_) => CommandKind::StopSession,
            CommandParams::UnlockConnector(_) => CommandKind::UnlockConnector,
        }
    }
}

macro_rules! command_params_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for CommandParams {
                fn from(params: $variant) -> Self {
                    CommandParams::$variant(params)
                }
            }
        )*
    };
}

command_params_from!(ReserveNow, CancelReservation, StartSession, StopSession, UnlockConnector);

// ============================================================================
// Responses
// ============================================================================

/// Synchronous acknowledgement verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResponseType {
    NotSupported,
    Rejected,
    Accepted,
    UnknownSession,
}

/// Body of the synchronous acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub result: CommandResponseType,
    /// Seconds the receiver expects to need before posting the result
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DisplayText>,
}

/// Final verdict reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResultType {
    Accepted,
    CanceledReservation,
    EvseOccupied,
    EvseInoperative,
    Failed,
    NotSupported,
    Rejected,
    Timeout,
    UnknownReservation,
}

/// Body posted to the callback URL once the command has executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: CommandResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<DisplayText>,
}

impl CommandResult {
    pub fn new(result: CommandResultType) -> Self {
        Self {
            result,
            message: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == CommandResultType::Accepted
    }
}

//! Command callback URLs
//!
//! `<commands-base>/<version>/<receiver-role>/<KEYWORD>/<command-id>`
//!
//! The command id is the last path segment, so the inbound handler can
//! correlate a posted result without any other state.

use hub_core::{CommandId, ProtocolVersion};
use thiserror::Error;
use url::Url;

use crate::ocpi::{CommandKind, UnknownCommand};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Invalid callback URL '{0}'")]
    InvalidUrl(String),

    #[error("Callback URL '{0}' does not end in /<KEYWORD>/<command-id>")]
    MissingSegments(String),

    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),
}

/// Build the callback URL for a command
pub fn callback_url(
    base: &str,
    version: ProtocolVersion,
    role_segment: &str,
    kind: CommandKind,
    command_id: &CommandId,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        base.trim_end_matches('/'),
        version,
        role_segment,
        kind.keyword(),
        command_id
    )
}

/// Recover `(kind, command id)` from a callback URL or path
pub fn parse_callback(url: &str) -> Result<(CommandKind, CommandId), CallbackError> {
    let path = if url.starts_with('/') {
        url.to_string()
    } else {
        Url::parse(url)
            .map_err(|_| CallbackError::InvalidUrl(url.to_string()))?
            .path()
            .to_string()
    };

    let mut segments = path.trim_end_matches('/').rsplit('/');
    let id = segments.next().filter(|s| !s.is_empty());
    let keyword = segments.next().filter(|s| !s.is_empty());

    match (keyword, id) {
        (Some(keyword), Some(id)) => Ok((keyword.parse()?, CommandId::new(id))),
        _ => Err(CallbackError::MissingSegments(url.to_string())),
    }
}

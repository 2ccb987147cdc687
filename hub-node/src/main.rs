//! Hub Node - CLI for the OCPI hub client
//!
//! Issues one client operation against a remote party and prints the
//! classified result as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Fetch a location
//! hub-node --token secret \
//!     --endpoint locations:SENDER=https://cpo.example/ocpi/2.2.1/locations \
//!     location LOC1
//!
//! # List sessions since a date, then show counters
//! hub-node --endpoint sessions:SENDER=https://cpo.example/ocpi/2.2.1/sessions \
//!     --counters sessions --from 2024-03-01T00:00:00Z --limit 50
//!
//! # Stop a session; the result arrives later at the callback URL
//! hub-node --callback-base https://hub.example/ocpi/commands \
//!     --endpoint commands:RECEIVER=https://cpo.example/ocpi/2.2.1/commands \
//!     stop-session SES1
//!
//! # Reserve an EVSE until a given time
//! hub-node --endpoint commands:RECEIVER=https://cpo.example/ocpi/2.2.1/commands \
//!     reserve-now RES1 LOC1 --token-file token.json \
//!     --expiry-date 2024-03-01T10:00:00Z --evse-uid EVSE1
//! ```
//!
//! Reads and commands each have a subcommand. Of the pushes only `put-token`
//! is exposed; the others are library calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use hub_adapter_ocpi::ocpi::{
    CancelReservation, ReserveNow, StartSession, StopSession, Token, TokenType, UnlockConnector,
};
use hub_adapter_ocpi::{ClientConfig, EndpointEntry, HubClient, TokenKey};
use hub_core::{
    CallResult, ListFilter, ProtocolVersion, RequestOptions, StaticDirectory, TracingObserver,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPI roaming hub outbound client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Remote endpoint, MODULE:ROLE[@VERSION]=URL (can be repeated)
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,

    /// OCPI version used for calls
    #[arg(long, default_value = "2.2.1")]
    ocpi_version: String,

    /// Token sent as `Authorization: Token <token>`
    #[arg(long)]
    token: Option<String>,

    /// Base URL of command callbacks
    #[arg(long)]
    callback_base: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Print per-operation counters after the call
    #[arg(long)]
    counters: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    operation: Operation,
}

#[derive(Subcommand, Debug)]
enum Operation {
    /// List locations
    Locations(FilterArgs),
    /// Fetch one location
    Location { location_id: String },
    /// Fetch one EVSE
    Evse { location_id: String, evse_uid: String },
    /// Fetch one connector
    Connector {
        location_id: String,
        evse_uid: String,
        connector_id: String,
    },
    /// List tariffs
    Tariffs(FilterArgs),
    /// List sessions
    Sessions(FilterArgs),
    /// List CDRs
    Cdrs(FilterArgs),
    /// List tokens
    Tokens(FilterArgs),
    /// Fetch a token from the tokens receiver
    Token {
        country_code: String,
        party_id: String,
        uid: String,
        #[arg(long, default_value = "RFID")]
        token_type: String,
    },
    /// Push the token in a JSON file to the tokens receiver
    PutToken {
        #[arg(long)]
        token_file: PathBuf,
    },
    /// Real-time authorization of a token
    Authorize {
        uid: String,
        #[arg(long, default_value = "RFID")]
        token_type: String,
    },
    /// Start a session for the token in a JSON file
    StartSession {
        location_id: String,
        #[arg(long)]
        token_file: PathBuf,
        #[arg(long)]
        evse_uid: Option<String>,
        #[arg(long)]
        connector_id: Option<String>,
    },
    /// Stop a session
    StopSession { session_id: String },
    /// Reserve an EVSE or any EVSE of a location for the token in a JSON file
    ReserveNow {
        reservation_id: String,
        location_id: String,
        #[arg(long)]
        token_file: PathBuf,
        /// End of the reservation (RFC 3339)
        #[arg(long)]
        expiry_date: DateTime<Utc>,
        #[arg(long)]
        evse_uid: Option<String>,
        #[arg(long)]
        authorization_reference: Option<String>,
    },
    /// Cancel a reservation
    CancelReservation { reservation_id: String },
    /// Unlock a connector
    UnlockConnector {
        location_id: String,
        evse_uid: String,
        connector_id: String,
    },
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Only objects updated at or after (RFC 3339)
    #[arg(long)]
    from: Option<DateTime<Utc>>,
    /// Only objects updated before (RFC 3339)
    #[arg(long)]
    to: Option<DateTime<Utc>>,
    #[arg(long)]
    offset: Option<u64>,
    #[arg(long)]
    limit: Option<u64>,
}

impl FilterArgs {
    fn filter(&self) -> ListFilter {
        ListFilter {
            from: self.from,
            to: self.to,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let version: ProtocolVersion = args.ocpi_version.parse()?;

    // Build directory
    let directory = StaticDirectory::new();
    for raw in &args.endpoints {
        let entry: EndpointEntry = raw.parse()?;
        entry.register(&directory, version);
        info!("Endpoint {}/{} -> {}", entry.module, entry.role, truncate(&entry.url, 60));
    }

    // Build configuration
    let mut config = ClientConfig::new()
        .with_version(version)
        .with_default_timeout(Duration::from_secs(args.timeout));
    if let Some(ref token) = args.token {
        config = config.with_token(token.clone());
    }
    if let Some(ref base) = args.callback_base {
        config = config.with_callback_base_url(base.clone());
    }

    let client = HubClient::builder(config)
        .directory(Arc::new(directory))
        .observer(Arc::new(TracingObserver))
        .build()?;

    let succeeded = run(&client, &args.operation).await?;

    if args.counters {
        eprintln!("{}", serde_json::to_string_pretty(&client.counters())?);
    }

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Run the selected operation; `Ok(false)` when the call did not succeed
async fn run(
    client: &HubClient,
    operation: &Operation,
) -> Result<bool, Box<dyn std::error::Error>> {
    let options = RequestOptions::new;

    let succeeded = match operation {
        Operation::Locations(f) => report(client.get_locations(f.filter(), options()).await)?,
        Operation::Location { location_id } => {
            report(client.get_location(location_id, options()).await)?
        }
        Operation::Evse {
            location_id,
            evse_uid,
        } => report(client.get_evse(location_id, evse_uid, options()).await)?,
        Operation::Connector {
            location_id,
            evse_uid,
            connector_id,
        } => report(
            client
                .get_connector(location_id, evse_uid, connector_id, options())
                .await,
        )?,
        Operation::Tariffs(f) => report(client.get_tariffs(f.filter(), options()).await)?,
        Operation::Sessions(f) => report(client.get_sessions(f.filter(), options()).await)?,
        Operation::Cdrs(f) => report(client.get_cdrs(f.filter(), options()).await)?,
        Operation::Tokens(f) => report(client.get_tokens(f.filter(), options()).await)?,
        Operation::Token {
            country_code,
            party_id,
            uid,
            token_type,
        } => {
            let key = TokenKey {
                country_code,
                party_id,
                uid,
                token_type: parse_token_type(token_type)?,
            };
            report(client.get_token(key, options()).await)?
        }
        Operation::PutToken { token_file } => {
            let token: Token = read_json(token_file)?;
            report(client.put_token(&token, options()).await)?
        }
        Operation::Authorize { uid, token_type } => report(
            client
                .authorize_token(uid, parse_token_type(token_type)?, None, options())
                .await,
        )?,
        Operation::StartSession {
            location_id,
            token_file,
            evse_uid,
            connector_id,
        } => {
            let params = StartSession {
                token: read_json(token_file)?,
                location_id: location_id.clone(),
                evse_uid: evse_uid.clone(),
                connector_id: connector_id.clone(),
                authorization_reference: None,
            };
            let (command, result) = client.start_session(params, options()).await;
            info!("Command {} callback {}", command.id, command.callback_url);
            report(result)?
        }
        Operation::StopSession { session_id } => {
            let params = StopSession {
                session_id: session_id.clone(),
            };
            let (command, result) = client.stop_session(params, options()).await;
            info!("Command {} callback {}", command.id, command.callback_url);
            report(result)?
        }
        Operation::ReserveNow {
            reservation_id,
            location_id,
            token_file,
            expiry_date,
            evse_uid,
            authorization_reference,
        } => {
            let params = ReserveNow {
                token: read_json(token_file)?,
                expiry_date: *expiry_date,
                reservation_id: reservation_id.clone(),
                location_id: location_id.clone(),
                evse_uid: evse_uid.clone(),
                authorization_reference: authorization_reference.clone(),
            };
            let (command, result) = client.reserve_now(params, options()).await;
            info!("Command {} callback {}", command.id, command.callback_url);
            report(result)?
        }
        Operation::CancelReservation { reservation_id } => {
            let params = CancelReservation {
                reservation_id: reservation_id.clone(),
            };
            let (command, result) = client.cancel_reservation(params, options()).await;
            info!("Command {} callback {}", command.id, command.callback_url);
            report(result)?
        }
        Operation::UnlockConnector {
            location_id,
            evse_uid,
            connector_id,
        } => {
            let params = UnlockConnector {
                location_id: location_id.clone(),
                evse_uid: evse_uid.clone(),
                connector_id: connector_id.clone(),
            };
            let (command, result) = client.unlock_connector(params, options()).await;
            info!("Command {} callback {}", command.id, command.callback_url);
            report(result)?
        }
    };

    Ok(succeeded)
}

/// Print the payload on stdout or the failure on stderr
fn report<T: Serialize>(result: CallResult<T>) -> Result<bool, serde_json::Error> {
    if let Some(meta) = result.meta() {
        if let Some(total) = meta.total_count {
            info!("{} objects in total", total);
        }
        if let Some(ref next) = meta.next_link {
            info!("Next page: {}", next);
        }
    }

    match result {
        CallResult::Success { payload, .. } => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(true)
        }
        other => {
            eprintln!("{}", serde_json::to_string_pretty(&other.summary())?);
            if let Some(detail) = other.detail() {
                eprintln!("{}", detail);
            }
            Ok(false)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

fn parse_token_type(value: &str) -> Result<TokenType, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_uppercase()))
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

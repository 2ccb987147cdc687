//! # Hub OCPI Adapter
//!
//! OCPI 2.2.1 client operations of the roaming hub, built on `hub-core`.
//!
//! ## Architecture
//!
//! ```text
//!   caller (hub business logic)
//!       │
//!       ▼
//! ┌──────────────────────────────────────┐
//! │    hub-adapter-ocpi                  │
//! │  ┌───────────┐   ┌────────────────┐  │
//! │  │ HubClient │──►│ Command        │  │
//! │  │ (ops)     │   │ dispatch       │  │
//! │  └─────┬─────┘   └───────┬────────┘  │
//! └────────┼─────────────────┼───────────┘
//!          ▼                 ▼
//! ┌──────────────────────────────────────┐
//! │    hub-core                          │
//! │  Executor │ Classifier │ Ledger      │
//! └──────────────────────────────────────┘
//!          │ HTTPS (X-Request-ID, X-Correlation-ID)
//!          ▼
//!   remote party module endpoints
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hub_adapter_ocpi::{ClientConfig, HubClient};
//! use hub_core::{InterfaceRole, ModuleId, ProtocolVersion, RequestOptions, StaticDirectory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = StaticDirectory::new().with_endpoint(
//!         ModuleId::Locations,
//!         InterfaceRole::Sender,
//!         ProtocolVersion::V2_2_1,
//!         "https://cpo.example/ocpi/2.2.1/locations",
//!     );
//!
//!     let client = HubClient::builder(ClientConfig::new().with_token("secret"))
//!         .directory(Arc::new(directory))
//!         .build()?;
//!
//!     let location = client.get_location("LOC1", RequestOptions::new()).await.into_result()?;
//!     println!("{}", location.id);
//!     Ok(())
//! }
//! ```

pub mod ocpi;
pub mod command;
pub mod config;
pub mod client;

pub use config::{ClientConfig, ConfigError, EndpointEntry};
pub use client::{HubClient, HubClientBuilder, TokenKey, MISSING_DATE_FROM_HINT};
pub use command::{AckRecord, Command, HubCommandLedger};

// Re-export key types
pub use ocpi::{
    CommandKind, CommandParams, CommandResponse, CommandResponseType, CommandResult,
    CommandResultType,
};

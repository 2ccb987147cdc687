//! Asynchronous command correlation
//!
//! - `callback`: callback URL layout, building and parsing
//! - `dispatch`: ledger-backed command dispatch

pub mod callback;
pub mod dispatch;

pub use callback::{callback_url, parse_callback, CallbackError};
pub use dispatch::{AckRecord, Command, CommandBody, HubCommandLedger};

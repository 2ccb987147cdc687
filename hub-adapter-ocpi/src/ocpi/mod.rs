//! OCPI 2.2.1 payloads
//!
//! - `types`: resource objects (locations, tariffs, sessions, CDRs, tokens)
//! - `commands`: command requests, acknowledgements and results

pub mod types;
pub mod commands;

pub use types::*;
pub use commands::*;

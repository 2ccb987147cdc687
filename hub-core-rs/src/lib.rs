//! Hub Core Library
//!
//! Outbound calling layer of the OCPI roaming hub: a single execution path
//! (resolve, dispatch, classify, instrument) shared by every client
//! operation, and a correlation ledger for commands that complete
//! asynchronously.

pub mod types;
pub mod error;
pub mod ids;
pub mod envelope;
pub mod counters;
pub mod hooks;
pub mod transport;
pub mod directory;
pub mod query;
pub mod classify;
pub mod executor;
pub mod ledger;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use types::*;
pub use error::{CallError, HookError, PayloadError, TransportError};
pub use ids::{CommandId, CorrelationId, EventTrackingId, IdGenerator, RandomIdGenerator, RequestId};
pub use envelope::{RequestEnvelope, RequestOptions};
pub use counters::{ClientCounters, CounterSnapshot};
pub use hooks::{CallObserver, HookPipeline, TracingObserver};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
pub use directory::{EndpointDirectory, StaticDirectory};
pub use query::ListFilter;
pub use classify::{CallResult, HttpMeta, OutcomeKind, OutcomeSummary};
pub use executor::{CallExecutor, CallSpec, ExecutorConfig};
pub use ledger::{CommandCompletion, CommandLedger, CommandRecord, RetentionPolicy};

//! Per-operation request/response counters
//!
//! Counters are owned by the client instance and only ever incremented by the
//! call executor. Readers get point-in-time snapshots.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Monotonic counters for a single operation
#[derive(Debug, Default)]
pub struct OperationCounters {
    requests_attempted: AtomicU64,
    requests_failed_locally: AtomicU64,
    responses_ok: AtomicU64,
    responses_error: AtomicU64,
}

/// Point-in-time copy of an operation's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub requests_attempted: u64,
    pub requests_failed_locally: u64,
    pub responses_ok: u64,
    pub responses_error: u64,
}

impl CounterSnapshot {
    /// Calls that have reached a terminal outcome
    pub fn completed(&self) -> u64 {
        self.requests_failed_locally + self.responses_ok + self.responses_error
    }
}

impl OperationCounters {
    pub(crate) fn attempted(&self) {
        self.requests_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed_locally(&self) {
        self.requests_failed_locally.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ok(&self) {
        self.responses_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.responses_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests_attempted: self.requests_attempted.load(Ordering::Relaxed),
            requests_failed_locally: self.requests_failed_locally.load(Ordering::Relaxed),
            responses_ok: self.responses_ok.load(Ordering::Relaxed),
            responses_error: self.responses_error.load(Ordering::Relaxed),
        }
    }
}

/// Counters for every operation a client has executed, keyed by operation name
#[derive(Debug, Default)]
pub struct ClientCounters {
    operations: RwLock<BTreeMap<&'static str, Arc<OperationCounters>>>,
}

impl ClientCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `operation`, registering them on first use
    pub fn for_operation(&self, operation: &'static str) -> Arc<OperationCounters> {
        if let Some(counters) = self.operations.read().get(operation) {
            return counters.clone();
        }

        self.operations
            .write()
            .entry(operation)
            .or_default()
            .clone()
    }

    /// Snapshot of a single operation; zeroes if it never ran
    pub fn get(&self, operation: &str) -> CounterSnapshot {
        self.operations
            .read()
            .get(operation)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Snapshot of all operations, ordered by name
    pub fn snapshot(&self) -> BTreeMap<&'static str, CounterSnapshot> {
        self.operations
            .read()
            .iter()
            .map(|(name, counters)| (*name, counters.snapshot()))
            .collect()
    }
}

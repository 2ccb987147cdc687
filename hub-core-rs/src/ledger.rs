//! Command correlation ledger
//!
//! Commands are acknowledged synchronously but complete out of band. The
//! ledger keeps one [`CommandRecord`] per [`CommandId`] so the later callback
//! can be matched with what was sent.
//!
//! Per key the ledger serializes insert, ack-write and final-write; distinct
//! keys live in different shards and do not contend. A final result, once
//! set, is never replaced or cleared by any ledger operation except removal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ids::CommandId;

/// Lifecycle state of one dispatched command
#[derive(Debug, Clone)]
pub struct CommandRecord<U, A, R> {
    pub command_id: CommandId,
    /// Command as last sent upstream
    pub upstream: U,
    /// Synchronous acknowledgement
    pub ack: Option<A>,
    /// Authoritative asynchronous outcome
    pub final_result: Option<R>,
    pub created_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<U, A, R> CommandRecord<U, A, R> {
    fn new(command_id: CommandId, upstream: U) -> Self {
        Self {
            command_id,
            upstream,
            ack: None,
            final_result: None,
            created_at: Utc::now(),
            acked_at: None,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.final_result.is_some()
    }
}

struct Slot<U, A, R> {
    record: CommandRecord<U, A, R>,
    completed: Arc<Notify>,
}

/// How long entries are kept before [`CommandLedger::sweep`] drops them
///
/// `None` keeps entries of that kind forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Age after completion
    pub completed_ttl: Option<Duration>,
    /// Age after creation, for entries that never completed
    pub pending_ttl: Option<Duration>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completed_ttl(mut self, ttl: Duration) -> Self {
        self.completed_ttl = Some(ttl);
        self
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = Some(ttl);
        self
    }

    fn expired<U, A, R>(&self, record: &CommandRecord<U, A, R>, now: DateTime<Utc>) -> bool {
        match record.completed_at {
            Some(completed_at) => older_than(completed_at, self.completed_ttl, now),
            None => older_than(record.created_at, self.pending_ttl, now),
        }
    }
}

fn older_than(since: DateTime<Utc>, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
    let Some(ttl) = ttl.and_then(|t| chrono::Duration::from_std(t).ok()) else {
        return false;
    };
    since + ttl <= now
}

/// Receives authoritative command outcomes from the inbound side
pub trait CommandCompletion<R>: Send + Sync {
    /// Record the final result; `false` if unknown or already completed
    fn complete_command(&self, command_id: &CommandId, result: R) -> bool;
}

/// Concurrent map from command id to lifecycle record
pub struct CommandLedger<U, A, R> {
    entries: DashMap<CommandId, Slot<U, A, R>>,
}

impl<U, A, R> Default for CommandLedger<U, A, R> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<U, A, R> CommandLedger<U, A, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry or replace the upstream command of an existing one
    ///
    /// Returns `true` when a new entry was created. `merge` only sees the
    /// previous upstream command; ack and final result are kept as they
    /// are. Both closures run under the shard lock and must not touch the
    /// ledger.
    pub fn upsert(
        &self,
        command_id: CommandId,
        insert: impl FnOnce() -> U,
        merge: impl FnOnce(&U) -> U,
    ) -> bool {
        match self.entries.entry(command_id) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.record.upstream = merge(&slot.record.upstream);
                debug!("Ledger: re-dispatch of {}", slot.record.command_id);
                false
            }
            Entry::Vacant(vacant) => {
                let record = CommandRecord::new(vacant.key().clone(), insert());
                debug!("Ledger: tracking {}", record.command_id);
                vacant.insert(Slot {
                    record,
                    completed: Arc::new(Notify::new()),
                });
                true
            }
        }
    }

    /// Store the synchronous acknowledgement; no-op for unknown ids
    pub fn record_ack(&self, command_id: &CommandId, ack: A) -> bool {
        match self.entries.get_mut(command_id) {
            Some(mut slot) => {
                slot.record.ack = Some(ack);
                slot.record.acked_at = Some(Utc::now());
                true
            }
            None => {
                debug!("Ledger: ack for unknown command {} dropped", command_id);
                false
            }
        }
    }

    /// Set the final result if none is set yet
    ///
    /// A second completion, or a completion for an unknown id, returns
    /// `false` and leaves the ledger unchanged.
    pub fn complete_with(&self, command_id: &CommandId, result: R) -> bool {
        let Some(mut slot) = self.entries.get_mut(command_id) else {
            warn!("Ledger: completion for unknown command {}", command_id);
            return false;
        };

        if slot.record.final_result.is_some() {
            debug!("Ledger: duplicate completion for {} ignored", command_id);
            return false;
        }

        slot.record.final_result = Some(result);
        slot.record.completed_at = Some(Utc::now());
        slot.completed.notify_waiters();
        info!("Ledger: command {} completed", command_id);
        true
    }

    pub fn contains(&self, command_id: &CommandId) -> bool {
        self.entries.contains_key(command_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only entries matching `keep`; returns how many were removed
    ///
    /// Waiters on a removed entry are woken and observe `None`.
    pub fn retain(&self, mut keep: impl FnMut(&CommandRecord<U, A, R>) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| {
            let kept = keep(&slot.record);
            if !kept {
                slot.completed.notify_waiters();
            }
            kept
        });
        before.saturating_sub(self.entries.len())
    }

    /// Drop entries the policy considers expired at `now`
    pub fn sweep(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> usize {
        let removed = self.retain(|record| !policy.expired(record, now));
        if removed > 0 {
            debug!("Ledger: swept {} entries", removed);
        }
        removed
    }
}

impl<U: Clone, A: Clone, R: Clone> CommandLedger<U, A, R> {
    /// Snapshot of an entry
    pub fn try_get(&self, command_id: &CommandId) -> Option<CommandRecord<U, A, R>> {
        self.entries.get(command_id).map(|slot| slot.record.clone())
    }

    /// Resolve once the command has a final result
    ///
    /// Returns `None` if the id is unknown or the entry is removed while
    /// waiting.
    pub async fn wait_for_completion(&self, command_id: &CommandId) -> Option<R> {
        loop {
            let completed = {
                let slot = self.entries.get(command_id)?;
                if let Some(result) = &slot.record.final_result {
                    return Some(result.clone());
                }
                slot.completed.clone()
            };

            let notified = completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Completion may have landed between the first check and enable()
            let settled = match self.entries.get(command_id) {
                None => return None,
                Some(slot) => slot.record.final_result.clone(),
            };
            if settled.is_some() {
                return settled;
            }

            notified.await;
        }
    }
}

impl<U, A, R> CommandLedger<U, A, R>
where
    U: Send + Sync + 'static,
    A: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Sweep periodically until `cancel` fires
    pub fn spawn_sweeper(
        ledger: Arc<Self>,
        policy: RetentionPolicy,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Ledger sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        ledger.sweep(&policy, Utc::now());
                    }
                }
            }
        })
    }
}

impl<U, A, R> CommandCompletion<R> for CommandLedger<U, A, R>
where
    U: Send + Sync,
    A: Send + Sync,
    R: Send + Sync,
{
    fn complete_command(&self, command_id: &CommandId, result: R) -> bool {
        self.complete_with(command_id, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Ledger = CommandLedger<String, &'static str, &'static str>;

    fn id(s: &str) -> CommandId {
        CommandId::new(s)
    }

    #[test]
    fn test_upsert_inserts_then_merges() {
        let ledger = Ledger::new();
        assert!(ledger.upsert(id("c1"), || "v1".into(), |_| unreachable!()));
        assert!(!ledger.upsert(id("c1"), || unreachable!(), |old| format!("{}+v2", old)));

        let record = ledger.try_get(&id("c1")).unwrap();
        assert_eq!(record.upstream, "v1+v2");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_redispatch_preserves_ack_and_final() {
        let ledger = Ledger::new();
        ledger.upsert(id("c1"), || "v1".into(), |old| old.clone());
        ledger.record_ack(&id("c1"), "ACCEPTED");
        assert!(ledger.complete_with(&id("c1"), "done"));

        ledger.upsert(id("c1"), || "v2".into(), |_| "v2".into());

        let record = ledger.try_get(&id("c1")).unwrap();
        assert_eq!(record.upstream, "v2");
        assert_eq!(record.ack, Some("ACCEPTED"));
        assert_eq!(record.final_result, Some("done"));
    }

    #[test]
    fn test_complete_with_is_idempotent() {
        let ledger = Ledger::new();
        ledger.upsert(id("c1"), || "v1".into(), |old| old.clone());

        assert!(ledger.complete_with(&id("c1"), "first"));
        assert!(!ledger.complete_with(&id("c1"), "second"));
        assert_eq!(ledger.try_get(&id("c1")).unwrap().final_result, Some("first"));
    }

    #[test]
    fn test_unknown_ids_are_no_ops() {
        let ledger = Ledger::new();
        assert!(!ledger.complete_with(&id("ghost"), "done"));
        assert!(!ledger.record_ack(&id("ghost"), "ACCEPTED"));
        assert!(ledger.is_empty());
        assert!(ledger.try_get(&id("ghost")).is_none());
    }

    #[test]
    fn test_late_ack_keeps_final() {
        let ledger = Ledger::new();
        ledger.upsert(id("c1"), || "v1".into(), |old| old.clone());
        ledger.complete_with(&id("c1"), "done");

        assert!(ledger.record_ack(&id("c1"), "ACCEPTED"));
        let record = ledger.try_get(&id("c1")).unwrap();
        assert_eq!(record.ack, Some("ACCEPTED"));
        assert_eq!(record.final_result, Some("done"));
        assert!(record.is_completed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_upserts() {
        let ledger = Arc::new(Ledger::new());

        let handles: Vec<_> = (0..1000)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger.upsert(id(&format!("cmd-{}", i)), || format!("v{}", i), |o| o.clone())
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(ledger.len(), 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completion_has_one_winner() {
        let ledger = Arc::new(Ledger::new());
        ledger.upsert(id("c1"), || "v1".into(), |o| o.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.complete_with(&id("c1"), "done") })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_wait_for_completion() {
        let ledger = Arc::new(Ledger::new());
        ledger.upsert(id("c1"), || "v1".into(), |o| o.clone());

        let completer = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ledger.complete_with(&id("c1"), "done")
            })
        };

        let c1 = id("c1");
        let wait = ledger.wait_for_completion(&c1);
        let result = tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .expect("completion not observed");
        assert_eq!(result, Some("done"));
        assert!(completer.await.unwrap());

        // Already completed resolves immediately
        assert_eq!(ledger.wait_for_completion(&id("c1")).await, Some("done"));
        assert_eq!(ledger.wait_for_completion(&id("ghost")).await, None);
    }

    #[tokio::test]
    async fn test_removal_wakes_waiters() {
        let ledger = Arc::new(Ledger::new());
        ledger.upsert(id("c1"), || "v1".into(), |o| o.clone());

        let waiter = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.wait_for_completion(&id("c1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(ledger.retain(|_| false), 1);
        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_sweep_applies_policy() {
        let ledger = Ledger::new();
        ledger.upsert(id("done"), || "v".into(), |o| o.clone());
        ledger.upsert(id("pending"), || "v".into(), |o| o.clone());
        ledger.complete_with(&id("done"), "ok");

        let policy = RetentionPolicy::new().with_completed_ttl(Duration::from_secs(60));
        let later = Utc::now() + chrono::Duration::seconds(120);

        assert_eq!(ledger.sweep(&policy, Utc::now()), 0);
        assert_eq!(ledger.sweep(&policy, later), 1);
        assert!(ledger.contains(&id("pending")));

        let policy = policy.with_pending_ttl(Duration::from_secs(60));
        assert_eq!(ledger.sweep(&policy, later), 1);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let ledger = Arc::new(Ledger::new());
        ledger.upsert(id("c1"), || "v".into(), |o| o.clone());
        ledger.complete_with(&id("c1"), "ok");

        let cancel = CancellationToken::new();
        let policy = RetentionPolicy::new().with_completed_ttl(Duration::ZERO);
        let handle = CommandLedger::spawn_sweeper(
            ledger.clone(),
            policy,
            Duration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ledger.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[test]
    fn test_completion_trait_object() {
        let ledger = Ledger::new();
        ledger.upsert(id("c1"), || "v".into(), |o| o.clone());

        let source: &dyn CommandCompletion<&'static str> = &ledger;
        assert!(source.complete_command(&id("c1"), "ok"));
        assert!(!source.complete_command(&id("c1"), "again"));
    }
}

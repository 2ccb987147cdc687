//! Request, correlation, event-tracking and command identifiers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of randomly generated alphanumeric identifiers
pub const RANDOM_ID_LENGTH: usize = 30;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifies a single outbound request (`X-Request-ID`)
    RequestId
);
string_id!(
    /// Groups a request with its response and, for commands, its async outcome
    /// (`X-Correlation-ID`)
    CorrelationId
);
string_id!(
    /// Cross-cutting tracing key with a lifetime independent of any request
    EventTrackingId
);
string_id!(
    /// Key of a dispatched command in the ledger, embedded in its callback URL
    CommandId
);

/// Source of fresh identifiers
pub trait IdGenerator: Send + Sync {
    fn request_id(&self) -> RequestId;
    fn correlation_id(&self) -> CorrelationId;
    fn event_tracking_id(&self) -> EventTrackingId;
    fn command_id(&self) -> CommandId;
}

/// Random identifiers: alphanumeric strings for protocol ids, UUIDs for tracking
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    fn random_string(len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn request_id(&self) -> RequestId {
        RequestId(Self::random_string(RANDOM_ID_LENGTH))
    }

    fn correlation_id(&self) -> CorrelationId {
        CorrelationId(Self::random_string(RANDOM_ID_LENGTH))
    }

    fn event_tracking_id(&self) -> EventTrackingId {
        EventTrackingId(Uuid::new_v4().to_string())
    }

    fn command_id(&self) -> CommandId {
        CommandId(Self::random_string(RANDOM_ID_LENGTH))
    }
}

/// Deterministic identifiers (`<prefix>-<kind>-<n>`) for replays and tests
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }

    fn next(&self, kind: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.prefix, kind, n)
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn request_id(&self) -> RequestId {
        RequestId(self.next("req"))
    }

    fn correlation_id(&self) -> CorrelationId {
        CorrelationId(self.next("cor"))
    }

    fn event_tracking_id(&self) -> EventTrackingId {
        EventTrackingId(self.next("evt"))
    }

    fn command_id(&self) -> CommandId {
        CommandId(self.next("cmd"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_ids_are_alphanumeric() {
        let ids = RandomIdGenerator;
        let id = ids.command_id();
        assert_eq!(id.as_str().len(), RANDOM_ID_LENGTH);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_random_ids_do_not_repeat() {
        let ids = RandomIdGenerator;
        let seen: HashSet<_> = (0..1000).map(|_| ids.command_id()).collect();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIdGenerator::new("t");
        assert_eq!(ids.request_id().as_str(), "t-req-1");
        assert_eq!(ids.command_id().as_str(), "t-cmd-2");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = CommandId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}

//! Crate level errors.
//!
//! Every layer of the queue (stores, RPC, coordination, router, orchestrator)
//! reports failures through the single [`Error`] enum defined here. The enum is
//! serializable so that node, journal and coordination servers can ship an error
//! back to the caller without losing its category.
//!
//! # Error Categories
//!
//! Each variant belongs to exactly one [`ErrorKind`]:
//!
//! | Kind             | Variants                                                   | Retriable |
//! |------------------|------------------------------------------------------------|-----------|
//! | `NotFound`       | `NoSuchTopic`, `NoSuchGroup`, `NoSuchNode`, `NoSuchJournal`, `MessageExpired`, `NoNode` | no |
//! | `AlreadyExists`  | `AlreadyExists`, `NodeExists`                              | no        |
//! | `Conflict`       | `NothingToAck`, `TopicInUse`, `BadVersion`, `NotEligible` | no |
//! | `Unavailable`    | `Unavailable`, `Timeout`, `CircuitOpen`                    | yes       |
//! | `Invalid`        | `Invalid`, `MissingPayload`, `Config`, `Protocol`          | no        |
//! | `PartialFailure` | `NotReplicated`, `PartialFailure`                          | no        |
//! | `Storage`        | `Storage`                                                  | yes       |
//! | `Fatal`          | `Fatal`                                                    | no        |
//!
//! The router only rotates to the next node on retriable errors, so a
//! `NoSuchTopic` from one node is returned as-is instead of masking a real
//! metadata problem.

use serde::{Deserialize, Serialize};
use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Error category used for retry decisions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Unavailable,
    Invalid,
    PartialFailure,
    Storage,
    Fatal,
}

impl ErrorKind {
    /// Returns a string label for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Invalid => "invalid",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::Storage => "storage",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Errors produced anywhere in the queue.
#[derive(Debug, Clone, PartialEq, Eq, ThisError, Serialize, Deserialize)]
pub enum Error {
    /// Topic does not exist on the node.
    #[error("Topic {0} does not exist")]
    NoSuchTopic(String),

    /// Consumer group does not exist on the topic.
    #[error("Consumer group {group} does not exist on topic {topic}")]
    NoSuchGroup { topic: String, group: String },

    /// Node id is not part of the router's or orchestrator's view.
    #[error("Node {0} is not known")]
    NoSuchNode(String),

    /// Journal id is not part of the cluster view.
    #[error("Journal {0} is not known")]
    NoSuchJournal(String),

    /// A retry-list entry pointed at a message whose ttl already elapsed.
    #[error("Message {id} on topic {topic} expired before redelivery")]
    MessageExpired { topic: String, id: u64 },

    /// Topic or consumer group already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Ack for an id that is not currently leased.
    #[error("Nothing to ack for message {id} in {topic}/{group}")]
    NothingToAck { topic: String, group: String, id: u64 },

    /// Topic still has consumer groups.
    #[error("Topic {0} still has consumer groups")]
    TopicInUse(String),

    /// Node exists but its status does not allow the operation.
    #[error("Node {node_id} is not eligible: {reason}")]
    NotEligible { node_id: String, reason: String },

    /// Coordination record changed since it was read.
    #[error("Version conflict on {path}: expected {expected}")]
    BadVersion { path: String, expected: u64 },

    /// Coordination path does not exist.
    #[error("No coordination node at {0}")]
    NoNode(String),

    /// Coordination path already exists.
    #[error("Coordination node already exists at {0}")]
    NodeExists(String),

    /// Peer could not be reached or dropped the connection.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its deadline.
    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Circuit breaker is open for a peer.
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    /// Malformed input (identifiers, receipts, arguments).
    #[error("Invalid argument: {0}")]
    Invalid(String),

    /// Message payload lacks the required field.
    #[error("Message is missing the required '{0}' field")]
    MissingPayload(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A message was accepted by a node but not written to every journal.
    #[error("Message {id} ({uid}) on node {node_id} was written but not replicated: {reason}")]
    NotReplicated {
        node_id: String,
        id: u64,
        uid: String,
        reason: String,
    },

    /// A fan-out operation failed on some targets.
    #[error("Operation failed on {failed:?}: {message}")]
    PartialFailure { message: String, failed: Vec<String> },

    /// Storage engine error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unrecoverable condition; the owning loop must stop.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoSuchTopic(_)
            | Error::NoSuchGroup { .. }
            | Error::NoSuchNode(_)
            | Error::NoSuchJournal(_)
            | Error::MessageExpired { .. }
            | Error::NoNode(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) | Error::NodeExists(_) => ErrorKind::AlreadyExists,
            Error::NothingToAck { .. }
            | Error::TopicInUse(_)
            | Error::NotEligible { .. }
            | Error::BadVersion { .. } => ErrorKind::Conflict,
            Error::Unavailable(_) | Error::Timeout { .. } | Error::CircuitOpen(_) => {
                ErrorKind::Unavailable
            }
            Error::Invalid(_) | Error::MissingPayload(_) | Error::Config(_) | Error::Protocol(_) => {
                ErrorKind::Invalid
            }
            Error::NotReplicated { .. } | Error::PartialFailure { .. } => {
                ErrorKind::PartialFailure
            }
            Error::Storage(_) => ErrorKind::Storage,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the same request may succeed against another node or a later attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::Storage)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Version conflicts and vanished records are expected when several
    /// orchestrators race on the same coordination record.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, Error::BadVersion { .. } | Error::NoNode(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Error::Timeout {
                operation: "io".to_string(),
                timeout_ms: 0,
            },
            _ => Error::Unavailable(e.to_string()),
        }
    }
}

impl From<slatedb::Error> for Error {
    fn from(e: slatedb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(format!("json: {}", e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Protocol(format!("bincode: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_errors() {
        assert!(Error::Unavailable("down".into()).is_retriable());
        assert!(
            Error::Timeout {
                operation: "get".into(),
                timeout_ms: 10
            }
            .is_retriable()
        );
        assert!(Error::CircuitOpen("n1".into()).is_retriable());
        assert!(!Error::NoSuchTopic("t".into()).is_retriable());
        assert!(!Error::Fatal("x".into()).is_retriable());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::NoNode("/a".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::NothingToAck {
                topic: "t".into(),
                group: "g".into(),
                id: 1
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::NotReplicated {
                node_id: "n".into(),
                id: 1,
                uid: "u".into(),
                reason: "r".into()
            }
            .kind(),
            ErrorKind::PartialFailure
        );
    }

    #[test]
    fn test_benign_race() {
        assert!(
            Error::BadVersion {
                path: "/a".into(),
                expected: 1
            }
            .is_benign_race()
        );
        assert!(Error::NoNode("/a".into()).is_benign_race());
        assert!(!Error::Unavailable("x".into()).is_benign_race());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_serde_round_trip_preserves_variant() {
        let err = Error::NoSuchGroup {
            topic: "orders".into(),
            group: "billing".into(),
        };
        let bytes = bincode::serialize(&err).unwrap();
        let back: Error = bincode::deserialize(&bytes).unwrap();
        assert_eq!(err, back);
    }
}

//! Shared value types passed between stores, RPC and the cluster layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Identifier of a storage node as registered in the coordination store.
pub type NodeId = String;

/// Identifier of a journal node as registered in the coordination store.
pub type JournalId = String;

/// Message payload as stored: flat string fields.
///
/// Structured values are stringified before they reach a store; see
/// [`crate::payload`] for the conversion in both directions.
pub type Fields = BTreeMap<String, String>;

/// Lifecycle status of a node or journal.
///
/// `ForceDown` is an administrator-only sink the orchestrator never leaves.
/// `ReadOnly` is administrator-set and only meaningful for nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "READONLY")]
    ReadOnly,
    #[serde(rename = "FORCEDOWN")]
    ForceDown,
}

impl Status {
    /// Whether the router may lease messages from a node in this state.
    pub fn is_readable(&self) -> bool {
        matches!(self, Status::Up | Status::ReadOnly)
    }

    /// Whether the router may send post, create, ack and fail to a node in this state.
    pub fn is_writable(&self) -> bool {
        matches!(self, Status::Up)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::ReadOnly => "READONLY",
            Status::ForceDown => "FORCEDOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Status::Up),
            "DOWN" => Ok(Status::Down),
            "READONLY" => Ok(Status::ReadOnly),
            "FORCEDOWN" => Ok(Status::ForceDown),
            other => Err(Error::Invalid(format!("unknown status '{}'", other))),
        }
    }
}

/// Result of a successful `postMessage` on a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posted {
    /// Id assigned by the node (the topic head after insertion).
    pub id: u64,
    /// Topic ttl the message was stored with, forwarded to journals.
    pub ttl: i64,
}

/// A message handed out by `getMessage` on a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivered {
    pub id: u64,
    pub fields: Fields,
    /// True when the message came from the retry list rather than the head walk.
    pub redelivery: bool,
    /// Undelivered messages plus retry-list entries left after this read.
    pub remaining: u64,
}

/// Per consumer group counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    /// Messages not yet handed out by the head walk.
    pub lag: u64,
    /// Entries waiting in the retry list.
    pub fails: u64,
    /// Messages currently leased.
    pub processing: u64,
}

impl ConsumerStats {
    /// Sums counters across nodes.
    pub fn merge(&mut self, other: &ConsumerStats) {
        self.lag += other.lag;
        self.fails += other.fails;
        self.processing += other.processing;
    }
}

/// One message as held by a journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: u64,
    pub fields: Fields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_uses_uppercase_names() {
        let json = serde_json::to_string(&Status::ForceDown).unwrap();
        assert_eq!(json, "\"FORCEDOWN\"");
        let back: Status = serde_json::from_str("\"READONLY\"").unwrap();
        assert_eq!(back, Status::ReadOnly);
    }

    #[test]
    fn test_status_eligibility() {
        assert!(Status::Up.is_writable());
        assert!(Status::Up.is_readable());
        assert!(Status::ReadOnly.is_readable());
        assert!(!Status::ReadOnly.is_writable());
        assert!(!Status::Down.is_readable());
        assert!(!Status::ForceDown.is_readable());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("down".parse::<Status>().unwrap(), Status::Down);
        assert!("sideways".parse::<Status>().is_err());
    }

    #[test]
    fn test_stats_merge() {
        let mut total = ConsumerStats::default();
        total.merge(&ConsumerStats {
            lag: 2,
            fails: 1,
            processing: 0,
        });
        total.merge(&ConsumerStats {
            lag: 3,
            fails: 0,
            processing: 4,
        });
        assert_eq!(
            total,
            ConsumerStats {
                lag: 5,
                fails: 1,
                processing: 4
            }
        );
    }
}

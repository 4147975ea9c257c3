//! Wire messages for the node, journal and coordination services.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cluster::coordination::Versioned;
use crate::error::Error;
use crate::types::{ConsumerStats, Delivered, Fields, JournalEntry, Posted};

/// Requests served by a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRequest {
    Ping,
    CreateTopic {
        topic: String,
        ttl_secs: Option<i64>,
    },
    CreateConsumerGroup {
        topic: String,
        group: String,
    },
    PostMessage {
        topic: String,
        fields: Fields,
    },
    RestoreMessage {
        topic: String,
        id: u64,
        fields: Fields,
    },
    GetMessage {
        topic: String,
        group: String,
        /// Visibility window in milliseconds; `None` leases forever.
        window_ms: Option<u64>,
    },
    AckMessage {
        topic: String,
        group: String,
        id: u64,
    },
    FailMessage {
        topic: String,
        group: String,
        id: u64,
    },
    ListTopics,
    GetConsumerGroups {
        topic: String,
    },
    GetConsumerStats {
        topic: String,
        group: String,
    },
    GetHead {
        topic: String,
    },
    GetHeads,
    ResetConsumerGroup {
        topic: String,
        group: String,
    },
    DeleteConsumerGroup {
        topic: String,
        group: String,
    },
    DeleteTopic {
        topic: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeResponse {
    Pong,
    Done,
    Posted(Posted),
    Restored(bool),
    Message(Option<Delivered>),
    Topics(Vec<String>),
    Groups(Vec<String>),
    Stats(ConsumerStats),
    Head(u64),
    Heads(BTreeMap<String, u64>),
    Error(Error),
}

/// Requests served by a journal node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRequest {
    Ping,
    Write {
        node_id: String,
        topic: String,
        id: u64,
        fields: Fields,
        ttl_secs: i64,
    },
    RetrieveMessages {
        node_id: String,
        topic: String,
        from_id: u64,
    },
    GetHead {
        node_id: String,
        topic: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalResponse {
    Pong,
    Done,
    Messages(Vec<JournalEntry>),
    Head(u64),
    Error(Error),
}

/// Requests served by the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordRequest {
    Create {
        path: String,
        data: Vec<u8>,
    },
    Get {
        path: String,
    },
    Set {
        path: String,
        data: Vec<u8>,
        expected_version: Option<u64>,
    },
    Delete {
        path: String,
        expected_version: Option<u64>,
    },
    Children {
        path: String,
    },
    Exists {
        path: String,
    },
    WaitForChange {
        since: u64,
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordResponse {
    Done,
    Node(Versioned),
    Version(u64),
    Children(Vec<String>),
    Exists(bool),
    ChangeCounter(u64),
    Error(Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_request_serialization() {
        let mut fields = Fields::new();
        fields.insert("message".into(), "hi".into());
        let request = NodeRequest::PostMessage {
            topic: "orders".into(),
            fields,
        };
        let bytes = bincode::serialize(&request).unwrap();
        let back: NodeRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = JournalResponse::Error(Error::NoSuchJournal("j1".into()));
        let bytes = bincode::serialize(&response).unwrap();
        let back: JournalResponse = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, response);
    }
}

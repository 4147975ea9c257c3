//! Delivery receipts.
//!
//! A receipt binds a lease to the node that granted it. On the wire it is a flat
//! `key:value:key:value` string; decoding is order independent and ignores
//! unknown keys. All values are identifiers (word characters) or integers, so
//! `:` can never appear inside a value.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::NodeId;

const NODE_KEY: &str = "nodeId";
const TOPIC_KEY: &str = "topic";
const GROUP_KEY: &str = "consumerGroup";
const ID_KEY: &str = "id";

/// Opaque token returned with every delivered message and required for ack/fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt {
    pub node_id: NodeId,
    pub topic: String,
    pub consumer_group: String,
    pub id: u64,
}

impl Receipt {
    pub fn new(
        node_id: impl Into<NodeId>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        id: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            id,
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{NODE_KEY}:{}:{TOPIC_KEY}:{}:{GROUP_KEY}:{}:{ID_KEY}:{}",
            self.node_id, self.topic, self.consumer_group, self.id
        )
    }

    pub fn decode(token: &str) -> Result<Self> {
        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() % 2 != 0 {
            return Err(Error::Invalid(format!(
                "receipt has an odd number of segments: {}",
                token
            )));
        }

        let pairs: HashMap<&str, &str> = parts
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();

        let field = |key: &str| -> Result<&str> {
            pairs
                .get(key)
                .copied()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Invalid(format!("receipt is missing '{}'", key)))
        };

        let id = field(ID_KEY)?
            .parse::<u64>()
            .map_err(|e| Error::Invalid(format!("receipt id is not a number: {}", e)))?;

        Ok(Self {
            node_id: field(NODE_KEY)?.to_string(),
            topic: field(TOPIC_KEY)?.to_string(),
            consumer_group: field(GROUP_KEY)?.to_string(),
            id,
        })
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Receipt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Receipt::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let receipt = Receipt::new("node_1", "orders", "billing", 42);
        let token = receipt.encode();
        assert_eq!(token, "nodeId:node_1:topic:orders:consumerGroup:billing:id:42");
        assert_eq!(Receipt::decode(&token).unwrap(), receipt);
    }

    #[test]
    fn test_decode_is_order_independent() {
        let token = "id:7:consumerGroup:g1:nodeId:n2:topic:t1";
        let receipt: Receipt = token.parse().unwrap();
        assert_eq!(receipt, Receipt::new("n2", "t1", "g1", 7));
    }

    #[test]
    fn test_decode_ignores_unknown_keys() {
        let token = "nodeId:n1:extra:x:topic:t1:consumerGroup:g1:id:1";
        assert_eq!(
            Receipt::decode(token).unwrap(),
            Receipt::new("n1", "t1", "g1", 1)
        );
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(Receipt::decode("").is_err());
        assert!(Receipt::decode("nodeId:n1:topic").is_err());
        assert!(Receipt::decode("nodeId:n1:topic:t1:consumerGroup:g1").is_err());
        assert!(Receipt::decode("nodeId:n1:topic:t1:consumerGroup:g1:id:abc").is_err());
        assert!(Receipt::decode("nodeId::topic:t1:consumerGroup:g1:id:1").is_err());
    }
}

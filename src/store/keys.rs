//! Key encoding for SlateDB storage.
//!
//! Keys are designed for lexicographic ordering and prefix scanning. Every key
//! starts with a one byte record type; variable-length identifier components are
//! terminated with `0x00`, which can never occur inside an identifier (word
//! characters only). Message ids are 8 byte big-endian so that key order matches
//! id order.
//!
//! # Queue node keys
//!
//! | Record          | Format                                  | Value          |
//! |-----------------|-----------------------------------------|----------------|
//! | Topic metadata  | `t<topic>`                              | `TopicMeta`    |
//! | Message         | `m<topic>\0<id:8>`                      | `StoredMessage`|
//! | Consumer group  | `g<topic>\0<group>`                     | `GroupState`   |
//!
//! # Journal keys
//!
//! | Record          | Format                                  | Value          |
//! |-----------------|-----------------------------------------|----------------|
//! | Journal head    | `h<node>\0<topic>`                      | `u64` BE       |
//! | Journal message | `j<node>\0<topic>\0<id:8>`              | `StoredMessage`|

/// Prefix byte for topic metadata keys.
pub const TOPIC_KEY_PREFIX: u8 = b't';

/// Prefix byte for message keys.
pub const MESSAGE_KEY_PREFIX: u8 = b'm';

/// Prefix byte for consumer group keys.
pub const GROUP_KEY_PREFIX: u8 = b'g';

/// Prefix byte for journal head keys.
pub const JOURNAL_HEAD_KEY_PREFIX: u8 = b'h';

/// Prefix byte for journal message keys.
pub const JOURNAL_MESSAGE_KEY_PREFIX: u8 = b'j';

const SEPARATOR: u8 = 0x00;

pub fn encode_topic_key(topic: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + topic.len());
    key.push(TOPIC_KEY_PREFIX);
    key.extend_from_slice(topic.as_bytes());
    key
}

/// Topic name from a topic metadata key.
pub fn decode_topic_key(key: &[u8]) -> Option<String> {
    match key.split_first() {
        Some((&TOPIC_KEY_PREFIX, rest)) => String::from_utf8(rest.to_vec()).ok(),
        _ => None,
    }
}

pub fn encode_message_key(topic: &str, id: u64) -> Vec<u8> {
    let mut key = message_key_prefix(topic);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Prefix shared by all message keys of a topic.
pub fn message_key_prefix(topic: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + topic.len() + 8);
    key.push(MESSAGE_KEY_PREFIX);
    key.extend_from_slice(topic.as_bytes());
    key.push(SEPARATOR);
    key
}

pub fn encode_group_key(topic: &str, group: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + topic.len() + group.len());
    key.push(GROUP_KEY_PREFIX);
    key.extend_from_slice(topic.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(group.as_bytes());
    key
}

pub fn encode_journal_head_key(node_id: &str, topic: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + node_id.len() + topic.len());
    key.push(JOURNAL_HEAD_KEY_PREFIX);
    key.extend_from_slice(node_id.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(topic.as_bytes());
    key
}

pub fn encode_journal_message_key(node_id: &str, topic: &str, id: u64) -> Vec<u8> {
    let mut key = journal_message_key_prefix(node_id, topic);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Prefix shared by all journal message keys of one (node, topic) log.
pub fn journal_message_key_prefix(node_id: &str, topic: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + node_id.len() + topic.len() + 8);
    key.push(JOURNAL_MESSAGE_KEY_PREFIX);
    key.extend_from_slice(node_id.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(topic.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Message id from the trailing 8 bytes of a message or journal message key.
pub fn decode_trailing_id(key: &[u8]) -> Option<u64> {
    if key.len() < 9 {
        return None;
    }
    let bytes: [u8; 8] = key[key.len() - 8..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Exclusive upper bound for a prefix scan.
///
/// Increments the last byte that is not `0xFF`, dropping everything after it.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    vec![u8::MAX; prefix.len() + 1]
}

pub fn encode_head(head: u64) -> [u8; 8] {
    head.to_be_bytes()
}

pub fn decode_head(bytes: &[u8]) -> u64 {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_keys_sort_by_id() {
        let k1 = encode_message_key("orders", 2);
        let k2 = encode_message_key("orders", 10);
        let k3 = encode_message_key("orders", 256);
        assert!(k1 < k2);
        assert!(k2 < k3);
    }

    #[test]
    fn test_topic_prefix_does_not_overlap_longer_topic() {
        let prefix = message_key_prefix("ab");
        let other = encode_message_key("abc", 1);
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn test_decode_trailing_id() {
        assert_eq!(decode_trailing_id(&encode_message_key("t1", 77)), Some(77));
        assert_eq!(
            decode_trailing_id(&encode_journal_message_key("n1", "t1", 5)),
            Some(5)
        );
        assert_eq!(decode_trailing_id(b"short"), None);
    }

    #[test]
    fn test_decode_topic_key() {
        assert_eq!(
            decode_topic_key(&encode_topic_key("orders")),
            Some("orders".to_string())
        );
        assert_eq!(decode_topic_key(&encode_group_key("orders", "g")), None);
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ab"), b"ac".to_vec());
        assert_eq!(prefix_end(&[b'a', 0xFF]), b"b".to_vec());
        let prefix = message_key_prefix("t1");
        let end = prefix_end(&prefix);
        assert!(encode_message_key("t1", u64::MAX) < end);
    }

    #[test]
    fn test_head_encoding() {
        assert_eq!(decode_head(&encode_head(123)), 123);
        assert_eq!(decode_head(&[1, 2]), 0);
    }
}

//! Validation utilities for queue identifiers.
//!
//! Topics, consumer groups, node ids and journal ids share one rule: 2 to 50
//! word characters (`[A-Za-z0-9_]`). The restriction keeps identifiers safe as
//! coordination-store path segments, storage key components and receipt values
//! (receipts use `:` as separator).
//!
//! ```
//! use clusterq::validation::{validate_topic_name, validate_group_name};
//!
//! assert!(validate_topic_name("orders_v2").is_ok());
//! assert!(validate_group_name("billing").is_ok());
//! assert!(validate_topic_name("x").is_err());
//! assert!(validate_group_name("with-dash").is_err());
//! ```

use crate::constants::{MAX_IDENTIFIER_LEN, MIN_IDENTIFIER_LEN};
use crate::error::{Error, Result};

/// Validate a topic name.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    validate_identifier(topic, "Topic name")
}

/// Validate a consumer group name.
pub fn validate_group_name(group: &str) -> Result<()> {
    validate_identifier(group, "Consumer group name")
}

/// Validate a node or journal id.
pub fn validate_member_id(id: &str) -> Result<()> {
    validate_identifier(id, "Member id")
}

fn validate_identifier(value: &str, kind: &str) -> Result<()> {
    if value.len() < MIN_IDENTIFIER_LEN || value.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Invalid(format!(
            "{} '{}' must be {}-{} characters",
            kind, value, MIN_IDENTIFIER_LEN, MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(Error::Invalid(format!(
            "{} '{}' contains invalid character '{}'",
            kind,
            value.escape_debug(),
            c.escape_debug()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_topic_name("ab").is_ok());
        assert!(validate_topic_name("Orders_2024").is_ok());
        assert!(validate_group_name(&"g".repeat(50)).is_ok());
        assert!(validate_member_id("node_1").is_ok());
    }

    #[test]
    fn test_length_bounds() {
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a").is_err());
        assert!(validate_topic_name(&"t".repeat(51)).is_err());
    }

    #[test]
    fn test_rejects_separators() {
        for bad in ["a:b", "a/b", "a-b", "a.b", "a b", "ünï"] {
            assert!(validate_topic_name(bad).is_err(), "{} should be rejected", bad);
        }
    }
}

//! Conversion between structured JSON messages and stored string fields.
//!
//! Stores only hold flat `field -> string` maps. Before posting, object and
//! array values are serialized to JSON text; on read, values that look like a
//! serialized object or array are parsed back. Parsing is best effort: a value
//! that merely starts with `{` but is not valid JSON comes back as a string.

use serde_json::{Map, Value};

use crate::types::Fields;

/// Flatten a JSON object into storable fields.
///
/// Strings are kept verbatim. Every other value is stored as its JSON text.
pub fn stringify(object: &Map<String, Value>) -> Fields {
    object
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

/// Rebuild a JSON object from stored fields.
pub fn reconstruct(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, text)| (key.clone(), parse_field(text)))
        .collect()
}

fn parse_field(text: &str) -> Value {
    let trimmed = text.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && let Ok(value) = serde_json::from_str::<Value>(text)
    {
        return value;
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stringify_keeps_strings_and_serializes_objects() {
        let object = json!({
            "message": "hello",
            "meta": {"attempt": 1},
            "tags": ["a", "b"],
            "count": 3
        });
        let fields = stringify(object.as_object().unwrap());

        assert_eq!(fields["message"], "hello");
        assert_eq!(fields["meta"], r#"{"attempt":1}"#);
        assert_eq!(fields["tags"], r#"["a","b"]"#);
        assert_eq!(fields["count"], "3");
    }

    #[test]
    fn test_reconstruct_parses_structured_values() {
        let object = json!({"message": "hi", "meta": {"k": [1, 2]}});
        let back = reconstruct(&stringify(object.as_object().unwrap()));
        assert_eq!(Value::Object(back), object);
    }

    #[test]
    fn test_reconstruct_is_best_effort() {
        let mut fields = Fields::new();
        fields.insert("message".into(), "{not json".into());
        fields.insert("n".into(), "42".into());
        let back = reconstruct(&fields);
        assert_eq!(back["message"], Value::String("{not json".into()));
        // Scalars stay strings; only objects and arrays are parsed back.
        assert_eq!(back["n"], Value::String("42".into()));
    }
}

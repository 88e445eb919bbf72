//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random document ids, bodies, and
//! query parameter sets that stay within the boundary's JSON contract
//! (bodies are objects; parameters are flat string-keyed objects).

use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for valid document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("invalid regex")
}

/// Strategy for scalar JSON values.
///
/// Floats are left out deliberately: integer, string, bool, and null
/// round-trip bit-exactly through JSON text, which keeps equality
/// assertions honest.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[ -~]{0,12}")
            .expect("invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for document bodies: flat JSON objects with scalar values.
pub fn document_body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("invalid regex"),
        json_scalar_strategy(),
        0..6,
    )
    .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<String, Value>>()))
}

/// Strategy for query parameter sets: flat string-keyed objects.
pub fn parameters_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("invalid regex"),
        json_scalar_strategy(),
        0..4,
    )
    .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<String, Value>>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn document_bodies_are_objects(body in document_body_strategy()) {
            prop_assert!(body.is_object());
        }

        #[test]
        fn bodies_round_trip_through_text(body in document_body_strategy()) {
            let text = body.to_string();
            let decoded: Value = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(body, decoded);
        }

        #[test]
        fn doc_ids_are_non_empty(id in doc_id_strategy()) {
            prop_assert!(!id.is_empty());
        }
    }
}

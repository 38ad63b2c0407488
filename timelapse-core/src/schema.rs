//! Schema inference: a flat structural fingerprint of a JSON value.
//!
//! Paths are dot-joined object keys; `[]` denotes "element of array". The
//! root is `$`. Non-empty arrays are sampled through their first element
//! only, so a heterogeneous array is described by whatever comes first.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path used for the root value.
pub const ROOT_PATH: &str = "$";

/// Structural type tag for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
    EmptyArray,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
            SchemaType::EmptyArray => "empty-array",
        }
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Null => SchemaType::Null,
            Value::Bool(_) => SchemaType::Boolean,
            Value::Number(_) => SchemaType::Number,
            Value::String(_) => SchemaType::String,
            Value::Array(_) => SchemaType::Array,
            Value::Object(_) => SchemaType::Object,
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural path -> type tag.
pub type SchemaMap = BTreeMap<String, SchemaType>;

/// Infer the schema map of a JSON value.
pub fn infer(value: &Value) -> SchemaMap {
    let mut map = SchemaMap::new();
    walk(value, "", &mut map);
    map
}

/// Records `value` at `prefix` and descends. Each path is written by exactly
/// one position in the traversal unless an object key itself contains a dot
/// (`{"a.b": 1, "a": {"b": "x"}}`); then the later write in key order wins.
fn walk(value: &Value, prefix: &str, map: &mut SchemaMap) {
    let here = if prefix.is_empty() { ROOT_PATH } else { prefix };
    map.insert(here.to_string(), SchemaType::of(value));

    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                walk(child, &join_key(prefix, key), map);
            }
        }
        Value::Array(items) => {
            let element = format!("{prefix}[]");
            match items.first() {
                Some(first) => walk(first, &element, map),
                None => {
                    map.insert(element, SchemaType::EmptyArray);
                }
            }
        }
        _ => {}
    }
}

pub(crate) fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tag(map: &SchemaMap, path: &str) -> Option<SchemaType> {
        map.get(path).copied()
    }

    #[test]
    fn test_scalar_root() {
        assert_eq!(infer(&json!(42)), SchemaMap::from([("$".to_string(), SchemaType::Number)]));
        assert_eq!(tag(&infer(&json!("x")), "$"), Some(SchemaType::String));
        assert_eq!(tag(&infer(&json!(true)), "$"), Some(SchemaType::Boolean));
        assert_eq!(tag(&infer(&json!(null)), "$"), Some(SchemaType::Null));
    }

    #[test]
    fn test_nested_object_paths() {
        let map = infer(&json!({
            "id": 1,
            "name": "x",
            "owner": {"email": null, "roles": ["admin"]}
        }));

        assert_eq!(tag(&map, "$"), Some(SchemaType::Object));
        assert_eq!(tag(&map, "id"), Some(SchemaType::Number));
        assert_eq!(tag(&map, "name"), Some(SchemaType::String));
        assert_eq!(tag(&map, "owner"), Some(SchemaType::Object));
        assert_eq!(tag(&map, "owner.email"), Some(SchemaType::Null));
        assert_eq!(tag(&map, "owner.roles"), Some(SchemaType::Array));
        assert_eq!(tag(&map, "owner.roles[]"), Some(SchemaType::String));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn test_array_samples_first_element_only() {
        let map = infer(&json!({"items": [{"id": 1}, {"id": "two", "extra": true}]}));

        assert_eq!(tag(&map, "items[]"), Some(SchemaType::Object));
        assert_eq!(tag(&map, "items[].id"), Some(SchemaType::Number));
        assert_eq!(tag(&map, "items[].extra"), None);
    }

    #[test]
    fn test_empty_array_tag() {
        let map = infer(&json!({"tags": []}));
        assert_eq!(tag(&map, "tags"), Some(SchemaType::Array));
        assert_eq!(tag(&map, "tags[]"), Some(SchemaType::EmptyArray));
    }

    #[test]
    fn test_root_array_paths() {
        let map = infer(&json!([{"id": 1}]));
        assert_eq!(tag(&map, "$"), Some(SchemaType::Array));
        assert_eq!(tag(&map, "[]"), Some(SchemaType::Object));
        assert_eq!(tag(&map, "[].id"), Some(SchemaType::Number));
    }

    #[test]
    fn test_infer_is_deterministic() {
        let value = json!({"b": [1, 2], "a": {"c": null}, "d": []});
        let first = infer(&value);
        let _ = infer(&json!({"unrelated": "call"}));
        assert_eq!(first, infer(&value));
    }

    #[test]
    fn test_type_tags_serialize_as_strings() {
        let text = serde_json::to_string(&SchemaType::EmptyArray).unwrap();
        assert_eq!(text, "\"empty-array\"");
        assert_eq!(SchemaType::Boolean.to_string(), "boolean");
    }
}

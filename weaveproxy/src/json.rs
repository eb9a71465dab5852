//! Typed access to loosely-typed JSON request and response bodies
//!
//! Docker API bodies are rewritten without a full schema: interceptors
//! decode them into a [`JsonObject`] and use these accessors to reach the
//! handful of fields they care about.

use crate::error::UnmarshalWrongTypeError;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

/// Accessors over a decoded JSON object
pub trait JsonObjectExt {
    /// Look up a child object, creating an empty one if the key is absent or null.
    fn object(&mut self, key: &str) -> Result<&mut JsonObject, UnmarshalWrongTypeError>;

    /// Look up a string; absent or null yields an empty string.
    fn string(&self, key: &str) -> Result<String, UnmarshalWrongTypeError>;

    /// Look up an array of strings; absent or null yields an empty list.
    fn string_array(&self, key: &str) -> Result<Vec<String>, UnmarshalWrongTypeError>;
}

impl JsonObjectExt for JsonObject {
    fn object(&mut self, key: &str) -> Result<&mut JsonObject, UnmarshalWrongTypeError> {
        let entry = self
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }

        match entry {
            Value::Object(object) => Ok(object),
            other => Err(UnmarshalWrongTypeError::new(key, "object", other)),
        }
    }

    fn string(&self, key: &str) -> Result<String, UnmarshalWrongTypeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(UnmarshalWrongTypeError::new(key, "string", other)),
        }
    }

    fn string_array(&self, key: &str) -> Result<Vec<String>, UnmarshalWrongTypeError> {
        let value = match self.get(key) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(value) => value,
        };
        let wrong_type = || UnmarshalWrongTypeError::new(key, "array of strings", value);

        value
            .as_array()
            .ok_or_else(wrong_type)?
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(wrong_type))
            .collect()
    }
}

/// Convert a list of strings into a JSON array value.
pub fn string_array_value<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::Array(items.into_iter().map(|s| Value::String(s.into())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_object_created_when_missing() {
        let mut container = JsonObject::new();
        container
            .object("HostConfig")
            .unwrap()
            .insert("NetworkMode".into(), json!("bridge"));

        let host_config = container.object("HostConfig").unwrap();
        assert_eq!(host_config.string("NetworkMode").unwrap(), "bridge");
        assert_eq!(container["HostConfig"]["NetworkMode"], json!("bridge"));
    }

    #[test]
    fn test_object_replaces_null() {
        let mut container = object(json!({"HostConfig": null}));
        assert!(container.object("HostConfig").unwrap().is_empty());
        assert_eq!(container["HostConfig"], json!({}));
    }

    #[test]
    fn test_object_wrong_type() {
        let mut container = object(json!({"HostConfig": "oops"}));
        let err = container.object("HostConfig").unwrap_err();
        assert_eq!(err.field, "HostConfig");
        assert_eq!(err.expected, "object");
        assert_eq!(err.got, json!("oops"));
    }

    #[test]
    fn test_string_missing_is_empty() {
        let container = object(json!({"Hostname": null}));
        assert_eq!(container.string("Hostname").unwrap(), "");
        assert_eq!(container.string("Domainname").unwrap(), "");
    }

    #[test]
    fn test_string_number_is_wrong_type() {
        let container = object(json!({"Hostname": 12}));
        let err = container.string("Hostname").unwrap_err();
        assert_eq!(err.expected, "string");
        assert!(err.to_string().contains("but got number"));
    }

    #[test]
    fn test_string_array() {
        let container = object(json!({"Env": ["A=1", "WEAVE_CIDR=none"], "Cmd": null}));
        assert_eq!(
            container.string_array("Env").unwrap(),
            vec!["A=1".to_string(), "WEAVE_CIDR=none".to_string()]
        );
        assert!(container.string_array("Cmd").unwrap().is_empty());
        assert!(container.string_array("Entrypoint").unwrap().is_empty());
    }

    #[test]
    fn test_string_array_rejects_mixed_elements() {
        let container = object(json!({"Env": ["A=1", 2]}));
        let err = container.string_array("Env").unwrap_err();
        assert_eq!(err.expected, "array of strings");
        assert_eq!(err.got, json!(["A=1", 2]));
    }

    #[test]
    fn test_string_array_rejects_string() {
        let container = object(json!({"Entrypoint": "/bin/sh"}));
        assert!(container.string_array("Entrypoint").is_err());
    }

    #[test]
    fn test_string_array_value_round_trips_through_accessor() {
        let mut container = JsonObject::new();
        container.insert("Cmd".into(), string_array_value(["/w/w", "-s"]));
        assert_eq!(container.string_array("Cmd").unwrap(), vec!["/w/w", "-s"]);
    }
}

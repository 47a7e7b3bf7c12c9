//! The streaming record evaluated by blueprints.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Record headers. Keys are unique; iteration follows insertion order, and
/// that order is what the codec puts on the wire.
pub type Headers = IndexMap<String, String>;

/// One consumed record, already decoded by the upstream transport client.
///
/// Read-only to both the host and the blueprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRecord {
    /// Record payload as text
    #[serde(default)]
    pub value: String,
    /// Record key as text
    #[serde(default)]
    pub key: String,
    /// Topic the record was consumed from
    pub topic: String,
    /// Producer or broker timestamp, milliseconds since the epoch
    #[serde(default, alias = "timestamp")]
    pub timestamp_millis: i64,
    /// Partition within the topic
    #[serde(default)]
    pub partition: i32,
    /// Offset within the partition
    #[serde(default)]
    pub offset: i64,
    /// Record headers
    #[serde(default)]
    pub headers: Headers,
}

impl InputRecord {
    /// Create an empty record on the given topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Builder: set the key
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Builder: set the value
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    /// Builder: set the timestamp
    pub fn timestamp_millis(mut self, millis: i64) -> Self {
        self.timestamp_millis = millis;
        self
    }

    /// Builder: set partition and offset
    pub fn at(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Builder: append a header. A repeated key keeps its original position
    /// and takes the new value.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_header_order() {
        let record = InputRecord::new("orders")
            .header("z", "1")
            .header("a", "2")
            .header("m", "3");

        let keys: Vec<&str> = record.headers.keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn test_repeated_header_replaces_value() {
        let record = InputRecord::new("orders").header("a", "1").header("b", "2").header("a", "3");
        assert_eq!(record.headers.len(), 2);
        assert_eq!(record.headers.get_index(0), Some((&"a".to_string(), &"3".to_string())));
    }

    #[test]
    fn test_json_accepts_timestamp_alias() {
        let json = r#"{"topic":"orders","timestamp":1717842091489,"partition":2,"offset":23,
                       "headers":{"b":"2","a":"1"}}"#;
        let record: InputRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.timestamp_millis, 1_717_842_091_489);
        assert_eq!(record.partition, 2);
        assert_eq!(record.key, "");
        let keys: Vec<&str> = record.headers.keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn test_json_uses_camel_case() {
        let record = InputRecord::new("t").timestamp_millis(5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestampMillis"], 5);
    }
}

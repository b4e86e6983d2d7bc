//! Stream-to-stream join operator (spec §4.4 "Stream join").
//!
//! Two input streams, equi-joined on declared `{left_key, right_key}`
//! columns. The right side is hashed over its current window; the
//! left side probes. If either buffer is empty, no output is
//! produced. Treatment is symmetric: swapping which stream is "left"
//! and which is "right" produces the same row set modulo ordering,
//! since matched rows are merged by plain key union rather than a
//! left/right-labelled wrapper.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::buffer::StreamBuffer;

/// The two columns an equi-join matches on.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    pub left_key:  String,
    pub right_key: String,
}

impl JoinConfig {
    #[must_use]
    pub fn new(left_key: impl Into<String>, right_key: impl Into<String>) -> Self {
        Self { left_key: left_key.into(), right_key: right_key.into() }
    }
}

/// Hash equi-join between two stream buffers.
pub struct StreamJoiner {
    config: JoinConfig,
}

impl StreamJoiner {
    #[must_use]
    pub fn new(config: JoinConfig) -> Self {
        Self { config }
    }

    /// Join the current contents of `left` and `right`. Emits nothing
    /// if either side is empty (spec §4.4, §8 boundary behaviors).
    #[must_use]
    pub fn join(&self, left: &StreamBuffer, right: &StreamBuffer) -> Vec<Value> {
        if left.is_empty() || right.is_empty() {
            return Vec::new();
        }

        let mut right_index: HashMap<String, Vec<&Value>> = HashMap::new();
        for entry in right.iter() {
            if let Some(key) = entry.record.get(&self.config.right_key) {
                right_index.entry(key_to_string(key)).or_default().push(&entry.record);
            }
        }

        let mut out = Vec::new();
        for entry in left.iter() {
            let Some(key) = entry.record.get(&self.config.left_key) else { continue };
            let Some(matches) = right_index.get(&key_to_string(key)) else { continue };
            for right_record in matches {
                out.push(merge_rows(&entry.record, right_record));
            }
        }
        out
    }
}

fn key_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Concatenate two matching rows into one object. Keys present in
/// both (e.g. the join key itself, which is equal by construction)
/// take the right row's value; this is the only place the merge is
/// not perfectly commutative, and since join-key values are equal on
/// a match it has no observable effect on symmetry.
fn merge_rows(left: &Value, right: &Value) -> Value {
    let mut out = Map::new();
    if let Value::Object(map) = left {
        out.extend(map.clone());
    }
    if let Value::Object(map) = right {
        out.extend(map.clone());
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    use super::*;

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn buffer_of(records: Vec<Value>) -> StreamBuffer {
        let mut buffer = StreamBuffer::new(100, Duration::seconds(100));
        for (i, record) in records.into_iter().enumerate() {
            buffer.push(record, t(i as i64));
        }
        buffer
    }

    #[test]
    fn matches_equal_keys_and_merges_fields() {
        let joiner = StreamJoiner::new(JoinConfig::new("user_id", "user_id"));
        let left = buffer_of(vec![json!({"user_id": 1, "click": "a"}), json!({"user_id": 2, "click": "b"})]);
        let right = buffer_of(vec![json!({"user_id": 1, "name": "alice"})]);
        let mut out = joiner.join(&left, &right);
        assert_eq!(out.len(), 1);
        let row = out.remove(0);
        assert_eq!(row["click"], "a");
        assert_eq!(row["name"], "alice");
    }

    #[test]
    fn empty_side_emits_nothing() {
        let joiner = StreamJoiner::new(JoinConfig::new("id", "id"));
        let left = buffer_of(vec![json!({"id": 1})]);
        let right = StreamBuffer::new(10, Duration::seconds(10));
        assert!(joiner.join(&left, &right).is_empty());
        assert!(joiner.join(&right, &left).is_empty());
    }

    #[test]
    fn symmetric_modulo_ordering() {
        let joiner_lr = StreamJoiner::new(JoinConfig::new("id", "id"));
        let joiner_rl = StreamJoiner::new(JoinConfig::new("id", "id"));
        let a = buffer_of(vec![json!({"id": 1, "a": 1}), json!({"id": 2, "a": 2})]);
        let b = buffer_of(vec![json!({"id": 1, "b": 10}), json!({"id": 2, "b": 20})]);

        let mut forward = joiner_lr.join(&a, &b);
        let mut backward = joiner_rl.join(&b, &a);
        forward.sort_by_key(|r| r["id"].as_i64().unwrap());
        backward.sort_by_key(|r| r["id"].as_i64().unwrap());
        assert_eq!(forward, backward);
    }
}

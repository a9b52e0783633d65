//! Ordered-object building blocks.
//!
//! A sequence serializes as `[{"a":..},{"b":..}]`: one single-key object
//! per field, in schema order, absent optionals omitted. A choice is a
//! single-key object. Primitives and homogeneous arrays are plain JSON.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::EebusError;

/// Builds a sequence value field by field, preserving declared order.
pub struct SeqBuilder {
    entries: Vec<Value>,
}

impl SeqBuilder {
    pub fn new() -> Self {
        SeqBuilder {
            entries: Vec::new(),
        }
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        let mut obj = Map::with_capacity(1);
        obj.insert(key.to_owned(), value);
        self.entries.push(Value::Object(obj));
        self
    }

    pub fn opt(self, key: &str, value: Option<Value>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    /// Append a presence-only tag, encoded as an empty sequence.
    pub fn tag_if(self, key: &str, present: bool) -> Self {
        if present {
            self.field(key, json!([]))
        } else {
            self
        }
    }

    pub fn build(self) -> Value {
        Value::Array(self.entries)
    }
}

impl Default for SeqBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-side view of a sequence: folds the array of single-key objects for
/// keyed lookup while remembering every key that was present.
pub struct SeqReader<'a> {
    entries: Vec<(&'a str, &'a Value)>,
}

impl<'a> SeqReader<'a> {
    pub fn new(value: &'a Value) -> Result<Self, EebusError> {
        let array = value
            .as_array()
            .ok_or_else(|| EebusError::Parse("expected a sequence (array of objects)".into()))?;

        let mut entries = Vec::with_capacity(array.len());
        for entry in array {
            let obj = entry.as_object().ok_or_else(|| {
                EebusError::Parse("sequence entry is not a single-key object".into())
            })?;
            if obj.len() != 1 {
                return Err(EebusError::Parse(format!(
                    "sequence entry has {} keys, expected 1",
                    obj.len()
                )));
            }
            let (key, inner) = obj.iter().next().expect("len checked");
            entries.push((key.as_str(), inner));
        }

        Ok(SeqReader { entries })
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    pub fn require(&self, key: &str) -> Result<&'a Value, EebusError> {
        self.get(key)
            .ok_or_else(|| EebusError::InputArgumentNull(key.to_owned()))
    }

    /// Fail when the sequence carries keys outside the allowed set.
    ///
    /// Used at closed schema levels; open extension points simply skip
    /// this check and unknown keys pass through untouched.
    pub fn deny_unknown(&self, allowed: &[&str]) -> Result<(), EebusError> {
        for (key, _) in &self.entries {
            if !allowed.contains(key) {
                return Err(EebusError::Parse(format!("unknown field `{key}`")));
            }
        }
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }
}

/// A choice value: exactly one labelled alternative.
pub fn choice_of<'a>(value: &'a Value) -> Result<(&'a str, &'a Value), EebusError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EebusError::Parse("expected a choice object".into()))?;
    if obj.len() != 1 {
        return Err(EebusError::Parse(format!(
            "choice has {} alternatives, expected exactly 1",
            obj.len()
        )));
    }
    let (key, inner) = obj.iter().next().expect("len checked");
    Ok((key.as_str(), inner))
}

pub fn as_str(value: &Value, what: &str) -> Result<String, EebusError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| EebusError::Parse(format!("{what}: expected a string")))
}

pub fn as_bool(value: &Value, what: &str) -> Result<bool, EebusError> {
    value
        .as_bool()
        .ok_or_else(|| EebusError::Parse(format!("{what}: expected a boolean")))
}

pub fn as_u64(value: &Value, what: &str) -> Result<u64, EebusError> {
    value
        .as_u64()
        .ok_or_else(|| EebusError::Parse(format!("{what}: expected an unsigned integer")))
}

pub fn as_u32(value: &Value, what: &str) -> Result<u32, EebusError> {
    let n = as_u64(value, what)?;
    u32::try_from(n).map_err(|_| EebusError::Parse(format!("{what}: value {n} out of range")))
}

pub fn as_i64(value: &Value, what: &str) -> Result<i64, EebusError> {
    value
        .as_i64()
        .ok_or_else(|| EebusError::Parse(format!("{what}: expected an integer")))
}

/// Compact JSON with schema field order; no superfluous whitespace.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("serde_json::Value is always serializable")
}

/// Parse exactly one JSON value; trailing bytes are an error.
pub fn from_slice_exact(bytes: &[u8]) -> Result<Value, EebusError> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value =
        Value::deserialize(&mut de).map_err(|e| EebusError::Parse(format!("invalid JSON: {e}")))?;
    de.end()
        .map_err(|_| EebusError::Parse("trailing bytes after JSON value".into()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_field_order() {
        let value = SeqBuilder::new()
            .field("b", json!(1))
            .field("a", json!(2))
            .opt("c", None)
            .build();
        assert_eq!(
            String::from_utf8(to_canonical_bytes(&value)).unwrap(),
            r#"[{"b":1},{"a":2}]"#
        );
    }

    #[test]
    fn reader_rejects_multi_key_entries() {
        let value = json!([{"a": 1, "b": 2}]);
        assert!(SeqReader::new(&value).is_err());
    }

    #[test]
    fn deny_unknown_catches_stray_fields() {
        let value = json!([{"phase": "ready"}, {"bogus": 1}]);
        let reader = SeqReader::new(&value).unwrap();
        assert!(reader.deny_unknown(&["phase", "waiting"]).is_err());
        assert!(reader.deny_unknown(&["phase", "bogus"]).is_ok());
    }

    #[test]
    fn exact_parse_rejects_trailing_bytes() {
        assert!(from_slice_exact(b"{\"cmi\":1}").is_ok());
        assert!(from_slice_exact(b"{\"cmi\":1}x").is_err());
        assert!(from_slice_exact(b"{\"cmi\":1}{}").is_err());
    }
}

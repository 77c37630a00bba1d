//! Values held by the key/value store.
//!
//! A value is a scalar, an ordered sequence, or a string-keyed mapping. The
//! `update` merge rules are defined over these three kinds in [`merge_into`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type StoreMap = BTreeMap<String, StoreValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Sequence(Vec<StoreValue>),
    Mapping(StoreMap),
}

/// Coarse kind used by the merge table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Sequence,
    Mapping,
}

impl StoreValue {
    /// Sentinel returned by `KeyValueStore::get` for absent keys
    pub fn empty() -> Self {
        StoreValue::Text(String::new())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            StoreValue::Sequence(_) => ValueKind::Sequence,
            StoreValue::Mapping(_) => ValueKind::Mapping,
            _ => ValueKind::Scalar,
        }
    }

    pub fn is_empty_sentinel(&self) -> bool {
        matches!(self, StoreValue::Text(s) if s.is_empty())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoreValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StoreValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[StoreValue]> {
        match self {
            StoreValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&StoreMap> {
        match self {
            StoreValue::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn sequence<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<StoreValue>,
    {
        StoreValue::Sequence(items.into_iter().map(Into::into).collect())
    }

    pub fn mapping<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<StoreValue>,
    {
        StoreValue::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Outcome of merging one key during `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Existing sequence extended with the new sequence
    Extended,
    /// New scalar or mapping pushed onto the existing sequence
    Appended,
    /// Absent sub-keys copied into the existing mapping
    MappingMerged,
    /// Kinds do not combine; existing value left as is
    Skipped,
}

/// Merge `incoming` into `existing`.
///
/// | existing | incoming | result                                 |
/// |----------|----------|----------------------------------------|
/// | sequence | sequence | concatenate                            |
/// | sequence | scalar   | append                                 |
/// | sequence | mapping  | append                                 |
/// | mapping  | mapping  | insert sub-keys not already present    |
/// | anything else       || unchanged                             |
pub fn merge_into(existing: &mut StoreValue, incoming: StoreValue) -> MergeOutcome {
    match (existing, incoming) {
        (StoreValue::Sequence(items), StoreValue::Sequence(more)) => {
            items.extend(more);
            MergeOutcome::Extended
        }
        (StoreValue::Sequence(items), other) => {
            items.push(other);
            MergeOutcome::Appended
        }
        (StoreValue::Mapping(map), StoreValue::Mapping(more)) => {
            for (k, v) in more {
                map.entry(k).or_insert(v);
            }
            MergeOutcome::MappingMerged
        }
        _ => MergeOutcome::Skipped,
    }
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::Text(value.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::Text(value)
    }
}

impl From<bool> for StoreValue {
    fn from(value: bool) -> Self {
        StoreValue::Bool(value)
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        StoreValue::Integer(value)
    }
}

impl From<i32> for StoreValue {
    fn from(value: i32) -> Self {
        StoreValue::Integer(value.into())
    }
}

impl From<f64> for StoreValue {
    fn from(value: f64) -> Self {
        StoreValue::Float(value)
    }
}

impl<T: Into<StoreValue>> From<Vec<T>> for StoreValue {
    fn from(values: Vec<T>) -> Self {
        StoreValue::sequence(values)
    }
}

impl From<StoreMap> for StoreValue {
    fn from(map: StoreMap) -> Self {
        StoreValue::Mapping(map)
    }
}

impl From<serde_json::Value> for StoreValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => StoreValue::Null,
            serde_json::Value::Bool(b) => StoreValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => StoreValue::Integer(i),
                None => StoreValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => StoreValue::Text(s),
            serde_json::Value::Array(items) => StoreValue::sequence(items),
            serde_json::Value::Object(map) => StoreValue::mapping(map),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_merges() {
        let mut v = StoreValue::from(vec![1, 2]);
        assert_eq!(merge_into(&mut v, vec![3].into()), MergeOutcome::Extended);
        assert_eq!(merge_into(&mut v, 4.into()), MergeOutcome::Appended);
        assert_eq!(v, StoreValue::from(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_mapping_merge_keeps_existing_sub_keys() {
        let mut v = StoreValue::mapping([("a", 1), ("b", 2)]);
        let outcome = merge_into(&mut v, StoreValue::mapping([("b", 20), ("c", 30)]));
        assert_eq!(outcome, MergeOutcome::MappingMerged);
        assert_eq!(v, StoreValue::mapping([("a", 1), ("b", 2), ("c", 30)]));
    }

    #[test]
    fn test_mismatched_kinds_are_skipped() {
        let mut scalar = StoreValue::from("x");
        assert_eq!(merge_into(&mut scalar, "y".into()), MergeOutcome::Skipped);
        assert_eq!(scalar, StoreValue::from("x"));

        let mut map = StoreValue::mapping([("a", 1)]);
        assert_eq!(merge_into(&mut map, vec![1].into()), MergeOutcome::Skipped);
        assert_eq!(map, StoreValue::mapping([("a", 1)]));
    }

    #[test]
    fn test_untagged_json_shape() {
        let v = StoreValue::mapping([
            ("n", StoreValue::Null),
            ("f", StoreValue::Float(1.5)),
            ("l", StoreValue::from(vec!["a", "b"])),
        ]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"f":1.5,"l":["a","b"],"n":null}"#);
        let back: StoreValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert_eq!(serde_json::from_str::<StoreValue>("3").unwrap(), StoreValue::Integer(3));
    }
}

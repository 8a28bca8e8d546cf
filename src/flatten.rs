//! Flattening of nested log entries into linked flat records.
//!
//! The collector only stores scalar columns, so every map or sequence nested
//! inside an entry is split out into its own record. Each extra record points
//! back at its parent through `_extra_for` and names the field it came from in
//! `_extra_name`; the parent advertises children through `_has_extra`.
//!
//! ```text
//! {"_id": "x", "a": {"n": 1}, "b": [1, {"n": 2}]}
//!   => {"_id": "x", "_has_extra": 1}
//!      {"_id": .., "_extra_for": "x", "_extra_name": "a", "_extra_type": "dict", "n": 1}
//!      {"_id": .., "_extra_for": "x", "_extra_name": "b", "_extra_type": "list", "_extra_list_index": 0, "b": 1}
//!      {"_id": .., "_extra_for": "x", "_extra_name": "b", "_extra_type": "list", "_extra_list_index": 1, "n": 2}
//! ```

use std::collections::VecDeque;

use uuid::Uuid;

use crate::{
    log_record::LogEntry,
    value::{Map, Value},
};

/// One flattened record: a map whose values are all scalars.
pub type FlatRecord = Map;

pub const ID_KEY: &str = "_id";
pub const HAS_EXTRA_KEY: &str = "_has_extra";
pub const EXTRA_FOR_KEY: &str = "_extra_for";
pub const EXTRA_NAME_KEY: &str = "_extra_name";
pub const EXTRA_TYPE_KEY: &str = "_extra_type";
pub const EXTRA_LIST_INDEX_KEY: &str = "_extra_list_index";
pub const LOG_MESSAGE_KEY: &str = "log_message";

/// Generate a fresh record identifier (32 lowercase hex digits).
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Flatten any log entry.
///
/// Structured entries go through [`flatten_map`]; scalar and message entries
/// bypass flattening and become a single `log_message` record.
pub fn flatten(entry: &LogEntry) -> Vec<FlatRecord> {
    match entry {
        LogEntry::Structured(map) => flatten_map(map),
        LogEntry::Scalar(value) => vec![message_record(value.to_string())],
        LogEntry::Message(message) => vec![message_record(message.clone())],
    }
}

fn message_record(message: String) -> FlatRecord {
    let mut record = FlatRecord::new();
    record.insert(LOG_MESSAGE_KEY.into(), Value::Str(message));
    record
}

/// Breadth-first flattening of a nested map. The input is left untouched.
pub fn flatten_map(entry: &Map) -> Vec<FlatRecord> {
    let mut root = entry.clone();
    root.entry(ID_KEY.to_owned())
        .or_insert_with(|| Value::Str(new_record_id()));

    let mut queue = VecDeque::from([root]);
    let mut flattened = Vec::new();

    while let Some(mut record) = queue.pop_front() {
        record.retain(|_, value| !value.is_empty_complex());

        let parent_id = record.get(ID_KEY).cloned().unwrap_or(Value::Null);
        let complex_keys: Vec<String> = record
            .iter()
            .filter(|(_, value)| value.is_complex())
            .map(|(key, _)| key.clone())
            .collect();

        let mut extras = Vec::new();
        for key in complex_keys {
            match record.remove(&key) {
                Some(Value::Map(child)) => {
                    extras.push(dict_extra(child, &parent_id, &key));
                }
                Some(Value::List(items)) => {
                    extras.extend(list_extras(items, &parent_id, &key));
                }
                Some(other) => {
                    record.insert(key, other);
                }
                None => {}
            }
        }

        record.insert(
            HAS_EXTRA_KEY.into(),
            Value::Int(i64::from(!extras.is_empty())),
        );
        queue.extend(extras);
        flattened.push(record);
    }

    flattened
}

fn extra_header(parent_id: &Value, name: &str, kind: &str) -> Map {
    let mut extra = Map::new();
    extra.insert(ID_KEY.into(), Value::Str(new_record_id()));
    extra.insert(EXTRA_FOR_KEY.into(), parent_id.clone());
    extra.insert(EXTRA_NAME_KEY.into(), Value::from(name));
    extra.insert(EXTRA_TYPE_KEY.into(), Value::from(kind));
    extra
}

fn dict_extra(mut child: Map, parent_id: &Value, name: &str) -> FlatRecord {
    child.extend(extra_header(parent_id, name, "dict"));
    child
}

fn list_extras(items: Vec<Value>, parent_id: &Value, name: &str) -> Vec<FlatRecord> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let mut extra = extra_header(parent_id, name, "list");
            extra.insert(
                EXTRA_LIST_INDEX_KEY.into(),
                Value::Int(i64::try_from(index).unwrap_or(i64::MAX)),
            );
            match item {
                Value::Map(fields) => extra.extend(fields),
                scalar => {
                    extra.insert(name.to_owned(), scalar);
                }
            }
            extra
        })
        .collect()
}

/// Coerce values the wire encoding cannot carry (document identifiers and
/// timestamps) to their string form. Returns sanitised copies.
pub fn sanitize(records: &[FlatRecord]) -> Vec<FlatRecord> {
    records
        .iter()
        .map(|record| {
            record
                .iter()
                .map(|(key, value)| {
                    let value = if value.is_portable() {
                        value.clone()
                    } else {
                        Value::Str(value.to_string())
                    };
                    (key.clone(), value)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectId;
    use chrono::{FixedOffset, TimeZone};
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    fn map(value: serde_json::Value) -> Map {
        match Value::from(value) {
            Value::Map(map) => map,
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[rstest]
    fn flattens_nested_dict_and_list() {
        let records = flatten_map(&map(json!({"_id": "x", "a": {"n": 1}, "b": [1, {"n": 2}]})));
        assert_eq!(records.len(), 4);

        let parent = &records[0];
        assert_eq!(parent[ID_KEY], Value::from("x"));
        assert_eq!(parent[HAS_EXTRA_KEY], Value::Int(1));
        assert!(!parent.contains_key("a"));
        assert!(!parent.contains_key("b"));

        let dict = &records[1];
        assert_eq!(dict[EXTRA_FOR_KEY], Value::from("x"));
        assert_eq!(dict[EXTRA_NAME_KEY], Value::from("a"));
        assert_eq!(dict[EXTRA_TYPE_KEY], Value::from("dict"));
        assert_eq!(dict["n"], Value::Int(1));

        let first = &records[2];
        assert_eq!(first[EXTRA_NAME_KEY], Value::from("b"));
        assert_eq!(first[EXTRA_TYPE_KEY], Value::from("list"));
        assert_eq!(first[EXTRA_LIST_INDEX_KEY], Value::Int(0));
        assert_eq!(first["b"], Value::Int(1));

        let second = &records[3];
        assert_eq!(second[EXTRA_LIST_INDEX_KEY], Value::Int(1));
        assert_eq!(second["n"], Value::Int(2));
        assert!(!second.contains_key("b"));
    }

    #[rstest]
    fn assigns_id_when_missing() {
        let records = flatten_map(&map(json!({"event": "login"})));
        assert_eq!(records.len(), 1);
        let id = records[0][ID_KEY].as_str().expect("generated id is a string");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(new_record_id(), new_record_id());
        assert_eq!(records[0][HAS_EXTRA_KEY], Value::Int(0));
    }

    #[rstest]
    fn drops_empty_containers() {
        let records = flatten_map(&map(json!({"_id": "x", "empty": {}, "none": [], "k": "v"})));
        assert_eq!(records.len(), 1);
        assert!(!records[0].contains_key("empty"));
        assert!(!records[0].contains_key("none"));
        assert_eq!(records[0]["k"], Value::from("v"));
        assert_eq!(records[0][HAS_EXTRA_KEY], Value::Int(0));
    }

    #[rstest]
    fn nested_extras_link_to_their_own_parent() {
        let records = flatten_map(&map(json!({"_id": "root", "outer": {"inner": {"leaf": true}}})));
        assert_eq!(records.len(), 3);
        let outer = &records[1];
        let inner = &records[2];
        assert_eq!(outer[HAS_EXTRA_KEY], Value::Int(1));
        assert_eq!(inner[EXTRA_FOR_KEY], outer[ID_KEY]);
        assert_eq!(inner[EXTRA_NAME_KEY], Value::from("inner"));
        assert_eq!(inner["leaf"], Value::Bool(true));
    }

    #[rstest]
    fn does_not_mutate_input() {
        let input = map(json!({"a": {"n": 1}}));
        let before = input.clone();
        let _ = flatten_map(&input);
        assert_eq!(input, before);
    }

    #[rstest]
    #[case(LogEntry::Message("hello".into()), "hello")]
    #[case(LogEntry::Scalar(Value::ObjectId(ObjectId([1; 12]))), "010101010101010101010101")]
    #[case(LogEntry::Scalar(Value::Int(7)), "7")]
    fn scalar_entries_bypass_flattening(#[case] entry: LogEntry, #[case] expected: &str) {
        let records = flatten(&entry);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[0][LOG_MESSAGE_KEY], Value::from(expected));
    }

    #[rstest]
    fn sanitize_stringifies_non_portable_values() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let when = tz.with_ymd_and_hms(2023, 5, 6, 7, 8, 9).unwrap();
        let mut record = FlatRecord::new();
        record.insert("oid".into(), Value::ObjectId(ObjectId([0x0f; 12])));
        record.insert("when".into(), Value::DateTime(when));
        record.insert("count".into(), Value::Int(3));
        let original = vec![record];

        let sanitized = sanitize(&original);
        assert_eq!(sanitized[0]["oid"], Value::from("0f".repeat(12)));
        assert_eq!(sanitized[0]["when"], Value::from("2023-05-06 07:08:09+01:00"));
        assert_eq!(sanitized[0]["count"], Value::Int(3));
        assert!(matches!(original[0]["oid"], Value::ObjectId(_)));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,6}".prop_map(Value::Str),
            any::<bool>().prop_map(Value::Bool),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn flattened_records_are_flat_and_linked(
            entry in proptest::collection::btree_map("[a-z]{1,4}", arb_value(), 0..5)
        ) {
            let records = flatten_map(&entry);
            let mut seen_ids = Vec::new();
            for (position, record) in records.iter().enumerate() {
                prop_assert!(record.values().all(|v| !v.is_complex()));
                prop_assert!(record.contains_key(HAS_EXTRA_KEY));
                if position > 0 {
                    let parent = record.get(EXTRA_FOR_KEY).expect("extra links to parent");
                    prop_assert!(seen_ids.contains(parent));
                }
                seen_ids.push(record[ID_KEY].clone());
            }
        }
    }
}

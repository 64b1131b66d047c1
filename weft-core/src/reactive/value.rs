//! Dynamic values stored in reactive records.
//!
//! Records are the only values that get deep reactive wrapping; scalars are
//! stored and compared by value. Raw record storage never holds a
//! [`Reactive`] wrapper: writes are normalised to the raw record first, so
//! the same record is never reachable through two different shapes.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::proxy::{self, Reactive};
use super::refs::Ref;
use super::runtime::{self, TargetId};
use crate::error::Result;

/// A value held by a record, a ref or a watcher.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A raw, untracked record.
    Record(Record),
    /// A tracking wrapper around a record.
    Reactive(Reactive),
    /// A ref stored inside a record. Reads through a reactive record unwrap it.
    Ref(Ref<Value>),
}

/// Object.is for floats: NaN equals NaN, `0.0` differs from `-0.0`.
pub(crate) fn same_float(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

/// Change-detection equality.
///
/// Scalars compare by value, records, reactives and refs by identity.
/// Values of different variants always differ, so `Int(1)` replaced by
/// `Float(1.0)` counts as a change.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => same_float(*a, *b),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Record(a), Value::Record(b)) => a.ptr_eq(b),
        (Value::Reactive(a), Value::Reactive(b)) => a.ptr_eq(b),
        (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
        _ => false,
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Record(_) => "record",
            Value::Reactive(_) => "reactive",
            Value::Ref(_) => "ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this is a record, raw or wrapped.
    pub fn is_record(&self) -> bool {
        matches!(self, Value::Record(_) | Value::Reactive(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The raw record behind a `Record` or `Reactive` value.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            Value::Reactive(reactive) => Some(reactive.raw()),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(reactive) => Some(reactive),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&Ref<Value>> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Strip a reactive wrapper, leaving every other value untouched.
    pub fn into_raw(self) -> Value {
        match self {
            Value::Reactive(reactive) => Value::Record(reactive.raw().clone()),
            other => other,
        }
    }

    /// Convert from JSON. Arrays become records keyed by index.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => Value::Record(Record::from_fields(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), Value::from_json(item))),
            )),
            serde_json::Value::Object(fields) => Value::Record(Record::from_fields(
                fields
                    .iter()
                    .map(|(key, item)| (key.clone(), Value::from_json(item))),
            )),
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(source: &str) -> Result<Value> {
        let json: serde_json::Value = serde_json::from_str(source)?;
        Ok(Value::from_json(&json))
    }

    /// Convert to JSON without tracking.
    ///
    /// A record that contains itself is emitted as `null` at the point of
    /// recursion. Non-finite floats are also emitted as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut visiting = HashSet::new();
        self.to_json_inner(&mut visiting)
    }

    /// Serialise to a JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json())?)
    }

    fn to_json_inner(&self, visiting: &mut HashSet<TargetId>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Record(_) | Value::Reactive(_) => {
                let Some(record) = self.as_record() else {
                    return serde_json::Value::Null;
                };
                if !visiting.insert(record.id()) {
                    return serde_json::Value::Null;
                }
                let fields = record
                    .entries()
                    .into_iter()
                    .map(|(key, value)| (key, value.to_json_inner(visiting)))
                    .collect();
                visiting.remove(&record.id());
                serde_json::Value::Object(fields)
            }
            Value::Ref(r) => r.get_untracked().to_json_inner(visiting),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        same_value(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Record(record) => write!(f, "Record({}, {} fields)", record.id(), record.len()),
            Value::Reactive(reactive) => write!(
                f,
                "Reactive({}, {} fields)",
                reactive.id(),
                reactive.raw().len()
            ),
            Value::Ref(_) => f.write_str("Ref(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl From<Reactive> for Value {
    fn from(reactive: Reactive) -> Self {
        Value::Reactive(reactive)
    }
}

impl From<Ref<Value>> for Value {
    fn from(r: Ref<Value>) -> Self {
        Value::Ref(r)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

// ----------------------------------------------------------------------------
// Record
// ----------------------------------------------------------------------------

struct RecordData {
    id: TargetId,
    fields: RwLock<IndexMap<String, Value>>,
}

impl Drop for RecordData {
    fn drop(&mut self) {
        runtime::forget_target(self.id);
        proxy::forget(self.id);
    }
}

/// A shared, ordered, untracked key-value record.
///
/// Cloning a record clones the handle, not the fields. Operations on a
/// record never track or trigger; go through [`Reactive`] for that.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordData>,
}

impl Record {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecordData {
                id: TargetId::new(),
                fields: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Build a record from key-value pairs, in order.
    pub fn from_fields<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let record = Self::new();
        {
            let mut map = record.inner.fields.write();
            for (key, value) in fields {
                map.insert(key.into(), value.into().into_raw());
            }
        }
        record
    }

    /// Builder-style insert.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.fields.read().get(key).cloned()
    }

    /// Insert a field, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let value = value.into().into_raw();
        let previous = self.inner.fields.write().insert(key.into(), value);
        previous
    }

    /// Remove a field, keeping the order of the others.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let previous = self.inner.fields.write().shift_remove(key);
        previous
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.read().keys().cloned().collect()
    }

    /// Snapshot of every field, in order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .fields
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.read().is_empty()
    }

    /// Whether both handles refer to the same record.
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id())
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::proxy::reactive;

    #[test]
    fn same_value_follows_object_is() {
        assert!(same_value(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
        assert!(!same_value(&Value::Float(0.0), &Value::Float(-0.0)));
        assert!(!same_value(&Value::Int(1), &Value::Float(1.0)));
        assert!(!same_value(
            &Value::Int((1 << 53) + 1),
            &Value::Float((1u64 << 53) as f64)
        ));
        assert!(!same_value(&Value::Int(1), &Value::from("1")));
    }

    #[test]
    fn records_compare_by_identity() {
        let a = Record::from_fields([("x", 1)]);
        let b = Record::from_fields([("x", 1)]);
        assert_ne!(Value::from(a.clone()), Value::from(b));
        assert_eq!(Value::from(a.clone()), Value::from(a));
    }

    #[test]
    fn insert_stores_raw_records() {
        let inner = Record::new();
        let outer = Record::new();
        outer.insert("inner", reactive(inner.clone()));

        match outer.get("inner") {
            Some(Value::Record(stored)) => assert!(stored.ptr_eq(&inner)),
            other => panic!("expected raw record, got {other:?}"),
        }
    }

    #[test]
    fn remove_keeps_order() {
        let record = Record::from_fields([("a", 1), ("b", 2), ("c", 3)]);
        assert_eq!(record.remove("b"), Some(Value::Int(2)));
        assert_eq!(record.keys(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn json_round_trip() {
        let value = Value::from_json_str(r#"{"name":"weft","tags":["a","b"],"ratio":0.5}"#)
            .expect("valid json");
        let record = value.as_record().expect("record");
        assert_eq!(record.keys(), vec!["name", "tags", "ratio"]);

        let json = value.to_json();
        assert_eq!(json["name"], "weft");
        assert_eq!(json["tags"]["1"], "b");
        assert_eq!(json["ratio"], 0.5);
    }

    #[test]
    fn json_breaks_cycles() {
        let record = Record::new();
        record.insert("self", record.clone());

        let json = Value::from(record.clone()).to_json();
        assert!(json["self"].is_null());

        // Break the cycle so the record can be dropped.
        record.remove("self");
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(Value::from_json_str("{").is_err());
    }
}

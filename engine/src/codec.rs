//! Conversion between native values and their replicated representation.
//!
//! Containers can only hold JSON-like scalars, so a handful of native values
//! are encoded as strings on the way in:
//!
//! | native                  | replicated                          |
//! |-------------------------|-------------------------------------|
//! | `NaN`, `±Infinity`      | `"NaN"`, `"Infinity"`, `"-Infinity"` |
//! | [`Value::Date`]         | RFC 3339 string, millisecond precision |
//! | [`Value::BigInt`]       | decimal string                      |
//!
//! With [`CodecOptions::revive_special_strings`] set, the number literals and
//! ISO timestamps are turned back into numbers and dates when read. User text
//! that happens to equal one of those literals is revived too; turn the option
//! off when that matters more than round-tripping dates.

use crate::proxy::{Proxy, Store};
use crate::{Doc, Prelim, ReplicaValue, Scalar};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Codec behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Turn `"NaN"`, `"Infinity"`, `"-Infinity"` and ISO timestamps back into
    /// numbers and dates when decoding.
    pub revive_special_strings: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            revive_special_strings: true,
        }
    }
}

/// A native value with reference identity. Cloning the handle shares the
/// value, so graphs (including cyclic ones) can be built from it.
#[derive(Clone)]
pub struct SharedValue(Arc<Mutex<Value>>);

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }

    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.addr())
    }
}

/// Native value model.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Shared(SharedValue),
    /// A live proxy over a replicated container.
    Proxy(Proxy),
}

impl Value {
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn shared(value: Value) -> Self {
        Value::Shared(SharedValue::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Value::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Deep copy with every proxy and shared cell replaced by plain values.
    /// Cycles are cut with `Null`.
    pub fn to_plain(&self) -> Value {
        let mut path = Vec::new();
        self.plain(&mut path)
    }

    fn plain(&self, path: &mut Vec<usize>) -> Value {
        match self {
            Value::Array(items) => Value::Array(items.iter().map(|v| v.plain(path)).collect()),
            Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.plain(path)))
                    .collect(),
            ),
            Value::Shared(shared) => {
                let addr = shared.addr();
                if path.contains(&addr) {
                    return Value::Null;
                }
                let inner = shared.get();
                path.push(addr);
                let value = inner.plain(path);
                path.pop();
                value
            }
            Value::Proxy(proxy) => proxy.to_value(),
            other => other.clone(),
        }
    }

    /// JSON form, using the same string encodings as the replica.
    pub fn to_json(&self) -> serde_json::Value {
        match self.to_plain() {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => encode_number(n).to_json(),
            Value::BigInt(n) => serde_json::Value::String(n.to_string()),
            Value::String(s) => serde_json::Value::String(s),
            Value::Date(date) => serde_json::Value::String(encode_date(&date)),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Shared(_) | Value::Proxy(_) => serde_json::Value::Null,
        }
    }

    /// Build a value from JSON. Numbers become `Number`, strings stay strings.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<Proxy> for Value {
    fn from(value: Proxy) -> Self {
        Value::Proxy(value)
    }
}

/// Encoding context: the document being written to and the shared cells on
/// the path from the root of the value being encoded.
#[derive(Debug, Clone)]
pub struct Seen {
    doc: usize,
    ancestors: HashSet<usize>,
}

impl Seen {
    pub fn new(doc: &Doc) -> Self {
        Self {
            doc: doc.key(),
            ancestors: HashSet::new(),
        }
    }

    fn contains(&self, shared: &SharedValue) -> bool {
        self.ancestors.contains(&shared.addr())
    }

    fn with(&self, shared: &SharedValue) -> Self {
        let mut next = self.clone();
        next.ancestors.insert(shared.addr());
        next
    }
}

/// Encode a native value for writing into the document `seen` was built for.
///
/// Never fails: a cyclic reference becomes `null` and is logged.
pub fn to_replica(value: &Value, seen: &Seen) -> Prelim {
    match value {
        Value::Null => Prelim::null(),
        Value::Bool(b) => Prelim::Scalar(Scalar::Bool(*b)),
        Value::Number(n) => Prelim::Scalar(encode_number(*n)),
        Value::BigInt(n) => Prelim::Scalar(Scalar::String(n.to_string())),
        Value::String(s) => Prelim::Scalar(Scalar::String(s.clone())),
        Value::Date(date) => Prelim::Scalar(Scalar::String(encode_date(date))),
        // each child gets its own copy of the ancestor set so shared siblings
        // are not mistaken for cycles
        Value::Array(items) => {
            Prelim::Sequence(items.iter().map(|v| to_replica(v, seen)).collect())
        }
        Value::Object(entries) => Prelim::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_replica(v, seen)))
                .collect(),
        ),
        Value::Shared(shared) => {
            if seen.contains(shared) {
                tracing::warn!(value = ?shared, "cyclic reference replaced with null");
                return Prelim::null();
            }
            let inner = shared.get();
            to_replica(&inner, &seen.with(shared))
        }
        Value::Proxy(proxy) => {
            if proxy.doc().key() == seen.doc {
                Prelim::Existing(proxy.container_id().clone())
            } else {
                // proxies of another document are copied by value
                to_replica(&proxy.to_value(), seen)
            }
        }
    }
}

/// Decode a slot value read from the store's document. Containers come back
/// as proxies owned by `store`.
pub fn from_replica(value: &ReplicaValue, store: &Store) -> Value {
    match value {
        ReplicaValue::Scalar(scalar) => decode_scalar(scalar, store.options()),
        ReplicaValue::Container(id) => store.wrap(id).map(Value::Proxy).unwrap_or(Value::Null),
    }
}

pub fn decode_scalar(scalar: &Scalar, options: &CodecOptions) -> Value {
    match scalar {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Number(n) => Value::Number(*n),
        Scalar::String(s) if options.revive_special_strings => revive(s),
        Scalar::String(s) => Value::String(s.clone()),
    }
}

fn encode_number(n: f64) -> Scalar {
    if n.is_nan() {
        Scalar::from("NaN")
    } else if n == f64::INFINITY {
        Scalar::from("Infinity")
    } else if n == f64::NEG_INFINITY {
        Scalar::from("-Infinity")
    } else {
        Scalar::Number(n)
    }
}

fn encode_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn revive(s: &str) -> Value {
    match s {
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        "-Infinity" => Value::Number(f64::NEG_INFINITY),
        _ if looks_like_timestamp(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| Value::Date(d.with_timezone(&Utc)))
            .unwrap_or_else(|_| Value::String(s.to_string())),
        _ => Value::String(s.to_string()),
    }
}

/// `YYYY-MM-DDTHH:MM:SS` prefix.
fn looks_like_timestamp(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 19 {
        return false;
    }
    bytes[..19].iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        10 => *b == b'T',
        13 | 16 => *b == b':',
        _ => b.is_ascii_digit(),
    })
}

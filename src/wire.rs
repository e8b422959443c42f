//! Wire envelope that round-trips rich values through plain JSON.
//!
//! Payloads travel as `{"json": <plain json>, "meta": {"values": {"<path>": ["Date"]}}}`.
//! Inside the process a rich value is a one-key marker object (`{"$date": "..."}`) produced
//! by serializing [`Date`]; `encode` lifts markers into `meta` and `decode` puts them back,
//! so typed structs deserialize with their rich fields intact.
//!
//! Object keys that start with `$` are user data, never markers. In-process they are spelled
//! with one extra leading `$` (`"$date"` on the wire is `"$$date"` in memory); `decode` adds
//! it and `encode` strips it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const DATE_MARKER: &str = "$date";
const KEY_ESCAPE: char = '$';

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("meta path '{0}' does not exist in payload")]
    MissingPath(String),
    #[error("meta path '{path}' annotated as {kind:?} but holds a non-string value")]
    NotAString { path: String, kind: RichKind },
    #[error("meta path '{path}' holds an invalid date: {value}")]
    InvalidDate { path: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RichKind {
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValues {
    /// The payload itself is a rich value.
    Root(Vec<RichKind>),
    Paths(BTreeMap<String, Vec<RichKind>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub values: MetaValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub json: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Envelope {
    pub fn null() -> Self { Envelope { json: Value::Null, meta: None } }
}

/// A UTC timestamp that survives the wire as a date rather than a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(pub DateTime<Utc>);

impl Date {
    pub fn now() -> Self { Date(Utc::now()) }
}

impl From<DateTime<Utc>> for Date {
    fn from(d: DateTime<Utc>) -> Self { Date(d) }
}

impl Serialize for Date {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(DATE_MARKER, &self.0.to_rfc3339())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Date {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Marker {
                #[serde(rename = "$date")]
                value: DateTime<Utc>,
            },
            Plain(DateTime<Utc>),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Marker { value } | Repr::Plain(value) => Ok(Date(value)),
        }
    }
}

fn escape_key(key: &str) -> String {
    key.replace('\\', "\\\\").replace('.', "\\.")
}

fn split_path(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() { cur.push(next); }
            }
            '.' => out.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    out.push(cur);
    out
}

fn key_from_wire(key: String) -> String {
    if key.starts_with(KEY_ESCAPE) { format!("{}{}", KEY_ESCAPE, key) } else { key }
}

fn key_to_wire(key: &str) -> &str {
    match key.strip_prefix(KEY_ESCAPE) {
        Some(rest) if rest.starts_with(KEY_ESCAPE) => rest,
        _ => key,
    }
}

fn keys_from_wire(value: Value) -> Value {
    match value {
        Value::Object(m) => Value::Object(m.into_iter().map(|(k, v)| (key_from_wire(k), keys_from_wire(v))).collect()),
        Value::Array(items) => Value::Array(items.into_iter().map(keys_from_wire).collect()),
        other => other,
    }
}

fn as_date_marker(v: &Value) -> Option<&str> {
    match v {
        Value::Object(m) if m.len() == 1 => m.get(DATE_MARKER).and_then(|d| d.as_str()),
        _ => None,
    }
}

fn lift(value: Value, path: &mut Vec<String>, found: &mut BTreeMap<String, Vec<RichKind>>) -> Value {
    if let Some(d) = as_date_marker(&value) {
        found.insert(path.join("."), vec![RichKind::Date]);
        return Value::String(d.to_string());
    }
    match value {
        Value::Object(m) => {
            let mut out = Map::with_capacity(m.len());
            for (k, v) in m {
                let k = key_to_wire(&k).to_string();
                path.push(escape_key(&k));
                let lifted = lift(v, path, found);
                path.pop();
                out.insert(k, lifted);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, v) in items.into_iter().enumerate() {
                path.push(i.to_string());
                out.push(lift(v, path, found));
                path.pop();
            }
            Value::Array(out)
        }
        other => other,
    }
}

/// Turn an in-process value (possibly holding rich markers) into a wire envelope.
pub fn encode(value: Value) -> Envelope {
    if let Some(d) = as_date_marker(&value) {
        return Envelope {
            json: Value::String(d.to_string()),
            meta: Some(Meta { values: MetaValues::Root(vec![RichKind::Date]) }),
        };
    }
    let mut found = BTreeMap::new();
    let json = lift(value, &mut Vec::new(), &mut found);
    let meta = if found.is_empty() { None } else { Some(Meta { values: MetaValues::Paths(found) }) };
    Envelope { json, meta }
}

fn restore(slot: &mut Value, path: &str, kinds: &[RichKind]) -> Result<(), WireError> {
    for kind in kinds {
        match kind {
            RichKind::Date => {
                let Some(s) = slot.as_str() else {
                    return Err(WireError::NotAString { path: path.to_string(), kind: *kind });
                };
                if DateTime::parse_from_rfc3339(s).is_err() {
                    return Err(WireError::InvalidDate { path: path.to_string(), value: s.to_string() });
                }
                let mut m = Map::with_capacity(1);
                m.insert(DATE_MARKER.to_string(), Value::String(s.to_string()));
                *slot = Value::Object(m);
            }
        }
    }
    Ok(())
}

fn locate<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in split_path(path) {
        cur = match cur {
            Value::Object(m) => m.get_mut(&key_from_wire(seg))?,
            Value::Array(items) => items.get_mut(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Turn a wire envelope back into an in-process value with rich markers restored.
pub fn decode(envelope: Envelope) -> Result<Value, WireError> {
    let Envelope { json, meta } = envelope;
    let mut json = keys_from_wire(json);
    match meta.map(|m| m.values) {
        None => {}
        Some(MetaValues::Root(kinds)) => restore(&mut json, "", &kinds)?,
        Some(MetaValues::Paths(paths)) => {
            for (path, kinds) in paths {
                let slot = locate(&mut json, &path).ok_or_else(|| WireError::MissingPath(path.clone()))?;
                restore(slot, &path, &kinds)?;
            }
        }
    }
    Ok(json)
}

/// Parse raw envelope text (request body or `input` query parameter).
pub fn decode_str(text: &str) -> Result<Value, WireError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    decode(envelope)
}

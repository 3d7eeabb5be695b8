//! Tagged-JSON wire form for byte-stream transports.
//!
//! Plain JSON carries null, booleans, finite numbers, strings, arrays, and
//! objects through unchanged. Everything else rides in a tag object keyed by
//! the reserved `"$type"` field: `undefined`, non-finite floats, bigints,
//! dates, regexps, typed arrays (base64 payload), maps, and sets. A plain
//! user object that itself contains a `"$type"` key is wrapped in an escape
//! form so the tag namespace stays unambiguous.
//!
//! Composite nodes reachable more than once are emitted once under a
//! numeric label (`"$type":"shared"`) and referenced thereafter
//! (`"$type":"ref"`), so shared subgraphs decode back to one node.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::{ErrorRecord, RpcError};
use crate::value::{BytesKind, Value};

const TAG: &str = "$type";

pub(crate) fn value_to_json(value: &Value) -> Json {
    let mut encoder = Encoder::default();
    encoder.count(value);
    encoder.encode(value)
}

pub(crate) fn value_from_json(json: &Json) -> Result<Value, RpcError> {
    Decoder::default().decode(json)
}

#[derive(Default)]
struct Encoder {
    occurrences: HashMap<*const (), u32>,
    labels: HashMap<*const (), u64>,
    next_label: u64,
}

impl Encoder {
    /// First pass: count composite occurrences so only genuinely shared
    /// nodes pay for a label.
    fn count(&mut self, value: &Value) {
        let Some(ptr) = composite_ptr(value) else {
            return;
        };
        let seen = self.occurrences.entry(ptr).or_insert(0);
        *seen += 1;
        if *seen > 1 {
            return;
        }
        match value {
            Value::Array(items) => {
                for item in items.iter() {
                    self.count(item);
                }
            }
            Value::Object(entries) => {
                for child in entries.values() {
                    self.count(child);
                }
            }
            Value::Map(entries) => {
                for (key, val) in entries.iter() {
                    self.count(key);
                    self.count(val);
                }
            }
            Value::Set(items) => {
                for item in items.iter() {
                    self.count(item);
                }
            }
            _ => {}
        }
    }

    fn encode(&mut self, value: &Value) -> Json {
        if let Some(ptr) = composite_ptr(value) {
            if self.occurrences.get(&ptr).copied().unwrap_or(0) > 1 {
                if let Some(label) = self.labels.get(&ptr) {
                    return json!({ TAG: "ref", "id": label });
                }
                let label = self.next_label;
                self.next_label += 1;
                self.labels.insert(ptr, label);
                let body = self.encode_node(value);
                return json!({ TAG: "shared", "id": label, "value": body });
            }
        }
        self.encode_node(value)
    }

    fn encode_node(&mut self, value: &Value) -> Json {
        match value {
            Value::Undefined => json!({ TAG: "undefined" }),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => json!(n),
            Value::Float(n) if n.is_finite() => json!(n),
            Value::Float(n) => {
                let repr = if n.is_nan() {
                    "nan"
                } else if n.is_sign_positive() {
                    "inf"
                } else {
                    "-inf"
                };
                json!({ TAG: "float", "value": repr })
            }
            Value::BigInt(n) => json!({ TAG: "bigint", "value": n.to_string() }),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(ms) => json!({ TAG: "date", "value": ms }),
            Value::RegExp { source, flags } => {
                json!({ TAG: "regexp", "source": source, "flags": flags })
            }
            Value::Bytes { kind, data } => {
                json!({ TAG: "bytes", "kind": kind.tag(), "value": BASE64.encode(data.as_slice()) })
            }
            Value::Array(items) => {
                Json::Array(items.iter().map(|item| self.encode(item)).collect())
            }
            Value::Object(entries) => {
                let mut out = JsonMap::with_capacity(entries.len());
                for (key, val) in entries.iter() {
                    out.insert(key.clone(), self.encode(val));
                }
                if entries.contains_key(TAG) {
                    json!({ TAG: "object", "value": Json::Object(out) })
                } else {
                    Json::Object(out)
                }
            }
            Value::Map(entries) => {
                let body: Vec<Json> = entries
                    .iter()
                    .map(|(key, val)| Json::Array(vec![self.encode(key), self.encode(val)]))
                    .collect();
                json!({ TAG: "map", "value": body })
            }
            Value::Set(items) => {
                let body: Vec<Json> = items.iter().map(|item| self.encode(item)).collect();
                json!({ TAG: "set", "value": body })
            }
            Value::Function(_) => {
                // Callables are swapped for placeholder strings before a
                // message reaches the wire; one surviving here is a bug in
                // the caller, not a value we can transmit.
                tracing::debug!("encoding stray callable as undefined");
                json!({ TAG: "undefined" })
            }
        }
    }
}

fn composite_ptr(value: &Value) -> Option<*const ()> {
    match value {
        Value::Array(items) => Some(Arc::as_ptr(items) as *const ()),
        Value::Object(entries) => Some(Arc::as_ptr(entries) as *const ()),
        Value::Map(entries) => Some(Arc::as_ptr(entries) as *const ()),
        Value::Set(items) => Some(Arc::as_ptr(items) as *const ()),
        Value::Bytes { data, .. } => Some(Arc::as_ptr(data) as *const ()),
        _ => None,
    }
}

#[derive(Default)]
struct Decoder {
    shared: HashMap<u64, Value>,
}

impl Decoder {
    fn decode(&mut self, json: &Json) -> Result<Value, RpcError> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(RpcError::protocol(format!("unrepresentable number {n}")))
                }
            }
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.decode(item)?);
                }
                Ok(Value::array(out))
            }
            Json::Object(entries) => match entries.get(TAG).and_then(Json::as_str) {
                Some(tag) => self.decode_tagged(tag, entries),
                None => self.decode_plain_object(entries),
            },
        }
    }

    fn decode_plain_object(&mut self, entries: &JsonMap<String, Json>) -> Result<Value, RpcError> {
        let mut out = std::collections::BTreeMap::new();
        for (key, val) in entries {
            out.insert(key.clone(), self.decode(val)?);
        }
        Ok(Value::Object(Arc::new(out)))
    }

    fn decode_tagged(
        &mut self,
        tag: &str,
        entries: &JsonMap<String, Json>,
    ) -> Result<Value, RpcError> {
        let payload = entries.get("value");
        match tag {
            "undefined" => Ok(Value::Undefined),
            "float" => match payload.and_then(Json::as_str) {
                Some("nan") => Ok(Value::Float(f64::NAN)),
                Some("inf") => Ok(Value::Float(f64::INFINITY)),
                Some("-inf") => Ok(Value::Float(f64::NEG_INFINITY)),
                _ => Err(RpcError::protocol("malformed float tag")),
            },
            "bigint" => {
                let digits = payload
                    .and_then(Json::as_str)
                    .ok_or_else(|| RpcError::protocol("malformed bigint tag"))?;
                digits
                    .parse::<i128>()
                    .map(Value::BigInt)
                    .map_err(|_| RpcError::protocol(format!("bigint out of range: {digits}")))
            }
            "date" => payload
                .and_then(Json::as_i64)
                .map(Value::Date)
                .ok_or_else(|| RpcError::protocol("malformed date tag")),
            "regexp" => {
                let source = entries
                    .get("source")
                    .and_then(Json::as_str)
                    .ok_or_else(|| RpcError::protocol("regexp tag missing source"))?;
                let flags = entries.get("flags").and_then(Json::as_str).unwrap_or("");
                Ok(Value::RegExp {
                    source: source.to_string(),
                    flags: flags.to_string(),
                })
            }
            "bytes" => {
                let kind = entries
                    .get("kind")
                    .and_then(Json::as_str)
                    .and_then(BytesKind::from_tag)
                    .ok_or_else(|| RpcError::protocol("bytes tag with unknown kind"))?;
                let encoded = payload
                    .and_then(Json::as_str)
                    .ok_or_else(|| RpcError::protocol("bytes tag missing payload"))?;
                let data = BASE64
                    .decode(encoded)
                    .map_err(|err| RpcError::protocol(format!("bad bytes payload: {err}")))?;
                Ok(Value::bytes(kind, data))
            }
            "map" => {
                let pairs = payload
                    .and_then(Json::as_array)
                    .ok_or_else(|| RpcError::protocol("malformed map tag"))?;
                let mut out = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let entry = pair
                        .as_array()
                        .filter(|entry| entry.len() == 2)
                        .ok_or_else(|| RpcError::protocol("map entry is not a pair"))?;
                    out.push((self.decode(&entry[0])?, self.decode(&entry[1])?));
                }
                Ok(Value::map(out))
            }
            "set" => {
                let items = payload
                    .and_then(Json::as_array)
                    .ok_or_else(|| RpcError::protocol("malformed set tag"))?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.decode(item)?);
                }
                Ok(Value::set(out))
            }
            "object" => {
                let inner = payload
                    .and_then(Json::as_object)
                    .ok_or_else(|| RpcError::protocol("malformed object escape"))?;
                self.decode_plain_object(inner)
            }
            "shared" => {
                let label = entries
                    .get("id")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| RpcError::protocol("shared tag missing id"))?;
                let body = payload.ok_or_else(|| RpcError::protocol("shared tag missing body"))?;
                let decoded = self.decode(body)?;
                self.shared.insert(label, decoded.clone());
                Ok(decoded)
            }
            "ref" => {
                let label = entries
                    .get("id")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| RpcError::protocol("ref tag missing id"))?;
                self.shared
                    .get(&label)
                    .cloned()
                    .ok_or_else(|| RpcError::protocol(format!("dangling shared ref {label}")))
            }
            other => Err(RpcError::protocol(format!("unknown value tag `{other}`"))),
        }
    }
}

pub(crate) fn error_to_json(record: &ErrorRecord) -> Json {
    let mut out = JsonMap::new();
    out.insert("name".to_string(), json!(record.name));
    out.insert("message".to_string(), json!(record.message));
    if let Some(stack) = &record.stack {
        out.insert("stack".to_string(), json!(stack));
    }
    if let Some(cause) = &record.cause {
        out.insert("cause".to_string(), error_to_json(cause));
    }
    if !record.extra.is_empty() {
        let mut extra = JsonMap::with_capacity(record.extra.len());
        for (key, val) in &record.extra {
            extra.insert(key.clone(), value_to_json(val));
        }
        out.insert("extra".to_string(), Json::Object(extra));
    }
    Json::Object(out)
}

pub(crate) fn error_from_json(json: &Json) -> Result<ErrorRecord, RpcError> {
    let entries = json
        .as_object()
        .ok_or_else(|| RpcError::protocol("error record is not an object"))?;
    let mut record = ErrorRecord {
        name: entries
            .get("name")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string(),
        message: entries
            .get("message")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string(),
        stack: entries
            .get("stack")
            .and_then(Json::as_str)
            .map(str::to_string),
        cause: None,
        extra: Default::default(),
    };
    if let Some(cause) = entries.get("cause") {
        record.cause = Some(Box::new(error_from_json(cause)?));
    }
    if let Some(extra) = entries.get("extra").and_then(Json::as_object) {
        for (key, val) in extra {
            record.extra.insert(key.clone(), value_from_json(val)?);
        }
    }
    Ok(record.normalized())
}

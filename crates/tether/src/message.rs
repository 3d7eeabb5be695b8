use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::{ErrorRecord, RpcError};
use crate::text::{error_from_json, error_to_json, value_from_json, value_to_json};
use crate::value::Value;

/// Wire protocol version carried by structured envelopes.
pub const PROTOCOL_VERSION: u8 = 2;

/// Prefix tagging callback identifiers; the legacy text format detects
/// placeholders by this prefix alone.
pub const CALLBACK_PREFIX: &str = "__callback__";

/// Reserved frame signaling a cooperative close. An adapter observing it
/// treats the connection as remotely closed.
pub const DESTROY_SENTINEL: &str = "__DESTROY__";

/// Operation discriminator for request messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestOp {
    Apply,
    Get,
    Set,
}

impl RequestOp {
    fn tag(self) -> &'static str {
        match self {
            RequestOp::Apply => "apply",
            RequestOp::Get => "get",
            RequestOp::Set => "set",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "apply" => Some(RequestOp::Apply),
            "get" => Some(RequestOp::Get),
            "set" => Some(RequestOp::Set),
            _ => None,
        }
    }
}

/// One parsed protocol message.
#[derive(Clone, Debug)]
pub enum RpcMessage {
    Request {
        id: String,
        method: String,
        op: RequestOp,
        args: Vec<Value>,
    },
    Response {
        id: String,
        outcome: Result<Value, ErrorRecord>,
    },
    /// Fire-and-forget invocation of a previously registered callback; no
    /// response is ever produced.
    Callback {
        callback_id: String,
        args: Vec<Value>,
    },
}

/// Envelope sidecar entry: the property path from the envelope root to a
/// callback placeholder, plus the identifier planted there.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallbackSlot {
    pub path: Vec<String>,
    pub id: String,
}

/// The structured (version 2) wire form. Object adapters carry this struct
/// unchanged; byte adapters carry its text rendering, one frame per line.
#[derive(Clone, Debug)]
pub struct WireEnvelope {
    pub version: u8,
    pub message: RpcMessage,
    /// Where in `args`/`result` callback placeholders live. Only populated
    /// in envelope mode; the text form relies on prefix detection instead.
    pub callbacks: Vec<CallbackSlot>,
    /// Transferable references the adapter hands to its native transfer
    /// primitive when `transfer = true`. Opaque to the core.
    pub transfers: Option<Vec<Value>>,
}

impl WireEnvelope {
    pub fn new(message: RpcMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
            callbacks: Vec::new(),
            transfers: None,
        }
    }

    /// Renders the legacy text form: a single tagged-JSON line without the
    /// sidecar (placeholders stay inline and are recognized by prefix).
    pub fn to_frame(&self) -> String {
        let mut out = JsonMap::new();
        out.insert("version".to_string(), json!(self.version));
        match &self.message {
            RpcMessage::Request {
                id,
                method,
                op,
                args,
            } => {
                out.insert("id".to_string(), json!(id));
                out.insert("type".to_string(), json!("request"));
                out.insert("method".to_string(), json!(method));
                out.insert("op".to_string(), json!(op.tag()));
                out.insert(
                    "args".to_string(),
                    Json::Array(args.iter().map(value_to_json).collect()),
                );
            }
            RpcMessage::Response { id, outcome } => {
                out.insert("id".to_string(), json!(id));
                out.insert("type".to_string(), json!("response"));
                match outcome {
                    Ok(result) => {
                        out.insert("result".to_string(), value_to_json(result));
                    }
                    Err(record) => {
                        out.insert("error".to_string(), error_to_json(record));
                    }
                }
            }
            RpcMessage::Callback { callback_id, args } => {
                out.insert("type".to_string(), json!("callback"));
                out.insert("callbackId".to_string(), json!(callback_id));
                out.insert(
                    "args".to_string(),
                    Json::Array(args.iter().map(value_to_json).collect()),
                );
            }
        }
        Json::Object(out).to_string()
    }

    /// Parses one text frame. Frames with an unknown version or a shape the
    /// protocol does not define are rejected as [`RpcError::Protocol`].
    pub fn from_frame(frame: &str) -> Result<Self, RpcError> {
        let json: Json = serde_json::from_str(frame)
            .map_err(|err| RpcError::protocol(format!("unparseable frame: {err}")))?;
        let entries = json
            .as_object()
            .ok_or_else(|| RpcError::protocol("frame is not an object"))?;

        if let Some(version) = entries.get("version").and_then(Json::as_u64) {
            if version != u64::from(PROTOCOL_VERSION) {
                return Err(RpcError::protocol(format!(
                    "unknown protocol version {version}"
                )));
            }
        }

        let kind = entries
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| RpcError::protocol("frame missing type"))?;

        let message = match kind {
            "request" => RpcMessage::Request {
                id: required_str(entries, "id")?,
                method: required_str(entries, "method")?,
                op: {
                    let tag = entries
                        .get("op")
                        .and_then(Json::as_str)
                        .ok_or_else(|| RpcError::protocol("frame missing op"))?;
                    RequestOp::from_tag(tag).ok_or_else(|| {
                        RpcError::protocol(format!("unknown request op `{tag}`"))
                    })?
                },
                args: decode_args(entries)?,
            },
            "response" => {
                let id = required_str(entries, "id")?;
                let outcome = match entries.get("error") {
                    Some(error) => Err(error_from_json(error)?),
                    None => Ok(match entries.get("result") {
                        Some(result) => value_from_json(result)?,
                        None => Value::Undefined,
                    }),
                };
                RpcMessage::Response { id, outcome }
            }
            "callback" => RpcMessage::Callback {
                callback_id: required_str(entries, "callbackId")?,
                args: decode_args(entries)?,
            },
            other => {
                return Err(RpcError::protocol(format!("unknown message type `{other}`")));
            }
        };

        Ok(Self {
            version: PROTOCOL_VERSION,
            message,
            callbacks: Vec::new(),
            transfers: None,
        })
    }
}

fn required_str(entries: &JsonMap<String, Json>, key: &str) -> Result<String, RpcError> {
    entries
        .get(key)
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::protocol(format!("frame missing {key}")))
}

fn decode_args(entries: &JsonMap<String, Json>) -> Result<Vec<Value>, RpcError> {
    let Some(args) = entries.get("args") else {
        return Ok(Vec::new());
    };
    let items = args
        .as_array()
        .ok_or_else(|| RpcError::protocol("args is not an array"))?;
    items.iter().map(value_from_json).collect()
}

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapter::AdapterMessage;
use crate::api::{Api, ApiNode};
use crate::channel::ChannelInner;
use crate::codec::CodecContext;
use crate::error::{ErrorRecord, RpcError};
use crate::message::{
    CallbackSlot, RpcMessage, RequestOp, WireEnvelope, PROTOCOL_VERSION,
};
use crate::value::Value;

/// Error-record name reserved for path-resolution failures so the caller
/// side can surface them as [`RpcError::MethodNotFound`].
const METHOD_NOT_FOUND: &str = "MethodNotFound";

/// Routes one incoming adapter message. Unparseable frames and unknown
/// envelope versions are protocol violations: logged and dropped, never
/// fatal.
pub(crate) fn handle_incoming(inner: &Arc<ChannelInner>, message: AdapterMessage) {
    let envelope = match message {
        AdapterMessage::Text(frame) => match WireEnvelope::from_frame(&frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(?error, adapter = inner.adapter.name(), "dropping bad frame");
                return;
            }
        },
        AdapterMessage::Envelope(envelope) => {
            if envelope.version != PROTOCOL_VERSION {
                warn!(
                    version = envelope.version,
                    adapter = inner.adapter.name(),
                    "dropping envelope with unknown version"
                );
                return;
            }
            envelope
        }
    };

    let sidecar = envelope.callbacks;
    match envelope.message {
        RpcMessage::Request {
            id,
            method,
            op,
            args,
        } => {
            // Requests run on their own tasks so a slow handler never
            // blocks the read loop; responses go out in completion order.
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                serve_request(inner, id, method, op, args, sidecar).await;
            });
        }
        RpcMessage::Response { id, outcome } => settle_response(inner, &id, outcome, &sidecar),
        RpcMessage::Callback { callback_id, args } => {
            invoke_callback(inner, &callback_id, args, &sidecar)
        }
    }
}

async fn serve_request(
    inner: Arc<ChannelInner>,
    id: String,
    method: String,
    op: RequestOp,
    args: Vec<Value>,
    sidecar: Vec<CallbackSlot>,
) {
    let codec = inner.codec();
    let text_mode = inner.text_mode();

    let outcome: Result<Value, ErrorRecord> = match op {
        RequestOp::Apply => {
            let handler = {
                let api = inner.api.read().expect("api lock");
                match api.resolve(&method) {
                    Some(ApiNode::Method(handler)) => Some(handler.clone()),
                    _ => None,
                }
            };
            match handler {
                Some(handler) => {
                    let decoded = codec.decode_values(args, &sidecar, "args", text_mode);
                    handler.invoke(decoded).await
                }
                None => Err(method_not_found(&method)),
            }
        }
        RequestOp::Get => {
            let value = {
                let api = inner.api.read().expect("api lock");
                api.resolve(&method).and_then(Api::read)
            };
            value.ok_or_else(|| method_not_found(&method))
        }
        RequestOp::Set => {
            let mut decoded = codec.decode_values(args, &sidecar, "args", text_mode);
            let value = if decoded.is_empty() {
                Value::Undefined
            } else {
                decoded.swap_remove(0)
            };
            let assigned = inner.api.write().expect("api lock").assign(&method, value);
            if assigned {
                Ok(Value::Undefined)
            } else {
                Err(method_not_found(&method))
            }
        }
    };

    respond(&inner, id, outcome, &codec);
}

fn respond(
    inner: &Arc<ChannelInner>,
    id: String,
    outcome: Result<Value, ErrorRecord>,
    codec: &CodecContext,
) {
    let envelope = match outcome {
        Ok(result) => match codec.encode_result(result) {
            Ok(mut encoded) => {
                let result = encoded.values.pop().unwrap_or(Value::Undefined);
                // Result-side registrations have no enclosing pending entry
                // to scope them to; they live until channel teardown.
                let mut envelope = WireEnvelope::new(RpcMessage::Response {
                    id,
                    outcome: Ok(result),
                });
                envelope.callbacks = encoded.sidecar;
                envelope
            }
            Err(error) => WireEnvelope::new(RpcMessage::Response {
                id,
                outcome: Err(ErrorRecord::named("TypeError", error.to_string())),
            }),
        },
        Err(record) => WireEnvelope::new(RpcMessage::Response {
            id,
            outcome: Err(record),
        }),
    };
    if inner.outbound.send(envelope).is_err() {
        debug!(adapter = inner.adapter.name(), "response dropped, channel closing");
    }
}

fn settle_response(
    inner: &Arc<ChannelInner>,
    id: &str,
    outcome: Result<Value, ErrorRecord>,
    sidecar: &[CallbackSlot],
) {
    let codec = inner.codec();
    let outcome = match outcome {
        Ok(value) => Ok(codec.decode_result(value, sidecar, inner.text_mode())),
        Err(record) => Err(remote_error(record)),
    };
    match inner.pending.settle(id, outcome) {
        Some(callback_ids) => inner.registry.release(&callback_ids),
        None => warn!(
            id,
            adapter = inner.adapter.name(),
            "dropping response with no matching request"
        ),
    }
}

fn invoke_callback(
    inner: &Arc<ChannelInner>,
    callback_id: &str,
    args: Vec<Value>,
    sidecar: &[CallbackSlot],
) {
    let Some(callback) = inner.registry.get(callback_id) else {
        warn!(
            callback_id,
            adapter = inner.adapter.name(),
            "dropping invocation of unknown callback"
        );
        return;
    };
    let codec = inner.codec();
    let decoded = codec.decode_values(args, sidecar, "args", inner.text_mode());
    callback.invoke(decoded);
}

fn method_not_found(path: &str) -> ErrorRecord {
    ErrorRecord::named(
        METHOD_NOT_FOUND,
        format!("no method or property at `{path}`"),
    )
    .with_extra("path", path)
}

/// Reconstructs the caller-facing error for a failed response. Resolution
/// failures surface as the dedicated variant; everything else keeps the
/// peer's record intact.
fn remote_error(record: ErrorRecord) -> RpcError {
    if record.name == METHOD_NOT_FOUND {
        let path = record
            .extra("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return RpcError::MethodNotFound { path };
    }
    RpcError::Remote(record.normalized())
}

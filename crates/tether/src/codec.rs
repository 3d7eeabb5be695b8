//! Callback extraction and synthesis.
//!
//! Before a message reaches the adapter, every [`Value::Function`] in its
//! `args` or `result` is swapped for a `__callback__<uuid>` placeholder
//! string: the callable is parked in the local registry and the placement
//! recorded in the envelope sidecar. On the way in, placeholders become
//! synthesized proxies that emit `callback` messages when invoked —
//! sidecar-directed in envelope mode, prefix-detected in text mode.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::adapter::Capabilities;
use crate::callbacks::CallbackRegistry;
use crate::error::RpcError;
use crate::message::{CallbackSlot, RpcMessage, WireEnvelope, CALLBACK_PREFIX};
use crate::value::{Callback, Value};

/// Everything the codec needs from its channel: where outgoing callback
/// registrations live, where synthesized proxies send their invocations,
/// and whether the transport can carry callbacks at all.
#[derive(Clone)]
pub(crate) struct CodecContext {
    pub registry: Arc<CallbackRegistry>,
    pub outbound: mpsc::UnboundedSender<WireEnvelope>,
    pub capabilities: Capabilities,
    pub adapter_name: String,
}

/// Encoded form of an outgoing argument list or result.
#[derive(Debug)]
pub(crate) struct Encoded {
    pub values: Vec<Value>,
    pub sidecar: Vec<CallbackSlot>,
    /// Identifiers registered during this encode, for per-call release.
    pub callback_ids: Vec<String>,
}

impl CodecContext {
    /// Replaces callables under the given envelope root (`"args"` or
    /// `"result"`) with placeholders. Rejects callables outright when the
    /// adapter is not bidirectional.
    pub(crate) fn encode_values(
        &self,
        mut values: Vec<Value>,
        root: &str,
    ) -> Result<Encoded, RpcError> {
        let mut sidecar = Vec::new();
        let mut callback_ids = Vec::new();
        let mut path = vec![root.to_string()];
        for (index, value) in values.iter_mut().enumerate() {
            path.push(index.to_string());
            self.extract(value, &mut path, &mut sidecar, &mut callback_ids)?;
            path.pop();
        }
        Ok(Encoded {
            values,
            sidecar,
            callback_ids,
        })
    }

    /// Single-value variant used for results.
    pub(crate) fn encode_result(&self, value: Value) -> Result<Encoded, RpcError> {
        let mut sidecar = Vec::new();
        let mut callback_ids = Vec::new();
        let mut path = vec!["result".to_string()];
        let mut value = value;
        self.extract(&mut value, &mut path, &mut sidecar, &mut callback_ids)?;
        Ok(Encoded {
            values: vec![value],
            sidecar,
            callback_ids,
        })
    }

    fn extract(
        &self,
        value: &mut Value,
        path: &mut Vec<String>,
        sidecar: &mut Vec<CallbackSlot>,
        callback_ids: &mut Vec<String>,
    ) -> Result<(), RpcError> {
        match value {
            Value::Function(callback) => {
                if !self.capabilities.bidirectional {
                    return Err(RpcError::CallbacksUnsupported {
                        adapter: self.adapter_name.clone(),
                    });
                }
                let id = self.registry.register(callback.clone());
                sidecar.push(CallbackSlot {
                    path: path.clone(),
                    id: id.clone(),
                });
                callback_ids.push(id.clone());
                *value = Value::String(id);
                Ok(())
            }
            // Descend only into subtrees that actually hold a callable:
            // `make_mut` clones shared nodes, which must stay shared when
            // no replacement happens under them.
            Value::Array(items) => {
                if !items.iter().any(contains_function) {
                    return Ok(());
                }
                let items = Arc::make_mut(items);
                for (index, item) in items.iter_mut().enumerate() {
                    path.push(index.to_string());
                    self.extract(item, path, sidecar, callback_ids)?;
                    path.pop();
                }
                Ok(())
            }
            Value::Object(entries) => {
                if !entries.values().any(contains_function) {
                    return Ok(());
                }
                let entries = Arc::make_mut(entries);
                for (key, child) in entries.iter_mut() {
                    path.push(key.clone());
                    self.extract(child, path, sidecar, callback_ids)?;
                    path.pop();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Decodes an incoming argument list: in envelope mode the sidecar says
    /// exactly where placeholders sit; in text mode every string is checked
    /// for the callback prefix.
    pub(crate) fn decode_values(
        &self,
        mut values: Vec<Value>,
        sidecar: &[CallbackSlot],
        root: &str,
        text_mode: bool,
    ) -> Vec<Value> {
        for slot in sidecar {
            let Some((head, rest)) = slot.path.split_first() else {
                continue;
            };
            if head != root {
                continue;
            }
            let Some((index_segment, inner)) = rest.split_first() else {
                continue;
            };
            let Ok(index) = index_segment.parse::<usize>() else {
                continue;
            };
            let Some(target) = values.get_mut(index) else {
                debug!(?slot.path, "sidecar path outside the argument list");
                continue;
            };
            let replacement = Value::Function(self.synthesize(slot.id.clone()));
            if !target.replace_at_path(inner, replacement) {
                debug!(?slot.path, "sidecar path did not resolve");
            }
        }
        if text_mode {
            for value in values.iter_mut() {
                self.detect_placeholders(value);
            }
        }
        values
    }

    /// Single-value variant used for results; `root` is `"result"` and the
    /// path after it addresses inside the value itself.
    pub(crate) fn decode_result(
        &self,
        mut value: Value,
        sidecar: &[CallbackSlot],
        text_mode: bool,
    ) -> Value {
        for slot in sidecar {
            let Some((head, rest)) = slot.path.split_first() else {
                continue;
            };
            if head != "result" {
                continue;
            }
            let replacement = Value::Function(self.synthesize(slot.id.clone()));
            if !value.replace_at_path(rest, replacement) {
                debug!(?slot.path, "sidecar path did not resolve");
            }
        }
        if text_mode {
            self.detect_placeholders(&mut value);
        }
        value
    }

    fn detect_placeholders(&self, value: &mut Value) {
        match value {
            Value::String(s) if s.starts_with(CALLBACK_PREFIX) => {
                *value = Value::Function(self.synthesize(s.clone()));
            }
            // Same sharing consideration as on the encode side.
            Value::Array(items) => {
                if !items.iter().any(contains_placeholder) {
                    return;
                }
                let items = Arc::make_mut(items);
                for item in items.iter_mut() {
                    self.detect_placeholders(item);
                }
            }
            Value::Object(entries) => {
                if !entries.values().any(contains_placeholder) {
                    return;
                }
                let entries = Arc::make_mut(entries);
                for child in entries.values_mut() {
                    self.detect_placeholders(child);
                }
            }
            _ => {}
        }
    }

    /// Builds the proxy a decoded placeholder becomes: invoking it emits a
    /// fire-and-forget `callback` message with the stored identifier.
    fn synthesize(&self, callback_id: String) -> Callback {
        let ctx = self.clone();
        Callback::new(move |args| {
            let encoded = match ctx.encode_values(args, "args") {
                Ok(encoded) => encoded,
                Err(error) => {
                    debug!(?error, "dropping callback invocation");
                    return;
                }
            };
            let mut envelope = WireEnvelope::new(RpcMessage::Callback {
                callback_id: callback_id.clone(),
                args: encoded.values,
            });
            envelope.callbacks = encoded.sidecar;
            if ctx.outbound.send(envelope).is_err() {
                debug!(%callback_id, "callback invoked after channel close");
            }
        })
    }
}

fn contains_function(value: &Value) -> bool {
    match value {
        Value::Function(_) => true,
        Value::Array(items) => items.iter().any(contains_function),
        Value::Object(entries) => entries.values().any(contains_function),
        _ => false,
    }
}

fn contains_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with(CALLBACK_PREFIX),
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(entries) => entries.values().any(contains_placeholder),
        _ => false,
    }
}

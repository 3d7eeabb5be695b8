use std::sync::Arc;

use uuid::Uuid;

use crate::channel::ChannelInner;
use crate::error::RpcError;
use crate::message::{RequestOp, RpcMessage, WireEnvelope};
use crate::value::Value;

/// Lazily-built handle onto the peer's exposed tree.
///
/// Navigation (`field`, `at`) only accumulates path segments; traffic
/// happens at the leaves: [`call`](RemoteProxy::call) invokes a method,
/// [`get`](RemoteProxy::get) reads a property, [`set`](RemoteProxy::set)
/// assigns one.
///
/// ```no_run
/// # async fn demo(proxy: tether::RemoteProxy) -> Result<(), tether::RpcError> {
/// use tether::Value;
///
/// let sum = proxy
///     .at("math.grade1.add")
///     .call(vec![Value::Int(40), Value::Int(2)])
///     .await?;
/// assert_eq!(sum, Value::Int(42));
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct RemoteProxy {
    inner: Arc<ChannelInner>,
    path: Vec<String>,
}

impl RemoteProxy {
    pub(crate) fn root(inner: Arc<ChannelInner>) -> Self {
        Self {
            inner,
            path: Vec::new(),
        }
    }

    /// Extends the path by one segment.
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(name.into());
        Self {
            inner: Arc::clone(&self.inner),
            path,
        }
    }

    /// Extends the path by a dotted run of segments.
    pub fn at(&self, dotted: &str) -> Self {
        let mut path = self.path.clone();
        path.extend(dotted.split('.').map(str::to_string));
        Self {
            inner: Arc::clone(&self.inner),
            path,
        }
    }

    /// The dotted method path this proxy addresses.
    pub fn method(&self) -> String {
        self.path.join(".")
    }

    /// Invokes the remote method at this path. Callback values anywhere in
    /// `args` are registered and invoked remotely for the call's lifetime.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.request(RequestOp::Apply, args).await
    }

    /// Reads the remote property (or namespace of properties) at this path.
    pub async fn get(&self) -> Result<Value, RpcError> {
        self.request(RequestOp::Get, Vec::new()).await
    }

    /// Assigns the remote property at this path, resolving on the peer's
    /// acknowledgment.
    pub async fn set(&self, value: impl Into<Value>) -> Result<(), RpcError> {
        self.request(RequestOp::Set, vec![value.into()]).await?;
        Ok(())
    }

    async fn request(&self, op: RequestOp, args: Vec<Value>) -> Result<Value, RpcError> {
        if self.inner.is_terminated() {
            return Err(RpcError::ChannelTerminated);
        }

        let codec = self.inner.codec();
        let encoded = codec.encode_values(args, "args")?;

        let id = Uuid::new_v4().to_string();
        let rx = self.inner.pending.insert(id.clone(), encoded.callback_ids);

        let mut envelope = WireEnvelope::new(RpcMessage::Request {
            id: id.clone(),
            method: self.method(),
            op,
            args: encoded.values,
        });
        envelope.callbacks = encoded.sidecar;

        let send_failed = self.inner.outbound.send(envelope).is_err();
        // A teardown racing the insert would otherwise strand the entry.
        if send_failed || self.inner.is_terminated() {
            if let Some(callback_ids) =
                self.inner.pending.settle(&id, Err(RpcError::ChannelTerminated))
            {
                self.inner.registry.release(&callback_ids);
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::ChannelTerminated),
        }
    }
}

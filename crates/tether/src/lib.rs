#![forbid(unsafe_code)]
//! Bidirectional RPC over any duplex byte or object transport.
//!
//! One endpoint exposes a nested tree of async methods and readable
//! properties ([`Api`]); the peer drives it through a lazily-built path
//! proxy ([`RemoteProxy`]) that turns `proxy.at("math.grade1.add").call(…)`
//! into wire requests and decoded, typed results. Errors thrown by a
//! handler arrive at the caller with their name, message, cause chain, and
//! custom fields intact, and callback values passed as arguments are
//! invoked back across the same connection. Both endpoints may call each
//! other simultaneously over one channel.
//!
//! ## Transports
//! Everything above the [`Adapter`] trait is transport-agnostic. Two
//! reference adapters ship in-crate:
//! - [`StreamAdapter`] frames any `AsyncRead`/`AsyncWrite` pair (child
//!   process stdio, sockets, `tokio::io::duplex`) with newline-terminated
//!   text messages, buffering partial frames across chunks.
//! - [`port_pair`] builds two connected in-memory adapters that pass
//!   structured envelopes as native values, message-port style.
//!
//! The channel picks the wire format from the adapter's [`Capabilities`]:
//! structured-clone transports carry version-2 envelopes with a callback
//! sidecar; byte transports carry a tagged-JSON text form that preserves
//! `undefined`, bigints, dates, regexps, typed arrays, maps, sets, and
//! shared subgraphs. Override with [`ChannelBuilder::serialization`] when
//! both peers agree.
//!
//! ## Lifecycle
//! A [`Channel`] starts reading eagerly on construction and runs until the
//! adapter's stream ends, the reserved destroy sentinel arrives, or
//! [`Channel::destroy`] is called; at that point every in-flight call
//! rejects with [`RpcError::ChannelTerminated`]. Dispatch is non-blocking:
//! a handler may await calls back into its own caller on the same channel
//! without deadlock.
//!
//! ```
//! use tether::{port_pair, Api, Channel, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tether::RpcError> {
//! let (port_a, port_b) = port_pair();
//! let _callee = Channel::builder(port_b)
//!     .expose(Api::new().method("add", |args| async move {
//!         let a = args[0].as_i64().unwrap_or(0);
//!         let b = args[1].as_i64().unwrap_or(0);
//!         Ok(Value::from(a + b))
//!     }))
//!     .build();
//!
//! let caller = Channel::new(port_a);
//! let sum = caller
//!     .api()
//!     .at("add")
//!     .call(vec![Value::Int(2), Value::Int(3)])
//!     .await?;
//! assert_eq!(sum, Value::Int(5));
//! # caller.destroy().await;
//! # Ok(()) }
//! ```
//!
//! Small utilities round out the crate: [`relay`] splices two adapters
//! into a transparent pass-through, and the [`HttpClientAdapter`] /
//! [`HttpServerBridge`] pair maps the protocol onto request/response
//! transports that cannot push (callbacks are rejected there, not
//! silently dropped).

mod adapter;
mod api;
mod callbacks;
mod channel;
mod codec;
mod dispatch;
mod duplex;
mod error;
mod framing;
mod http;
mod message;
mod pending;
mod proxy;
mod relay;
mod text;
mod value;

pub use adapter::{Adapter, AdapterMessage, Capabilities, MessageHook};
pub use api::{Api, ApiNode, HandlerFuture, Method};
pub use channel::{Channel, ChannelBuilder, Serialization};
pub use duplex::{port_pair, PortAdapter, StreamAdapter};
pub use error::{ErrorRecord, RpcError};
pub use framing::FrameBuffer;
pub use http::{HttpClientAdapter, HttpServerAdapter, HttpServerBridge};
pub use message::{
    CallbackSlot, RequestOp, RpcMessage, WireEnvelope, CALLBACK_PREFIX, DESTROY_SENTINEL,
    PROTOCOL_VERSION,
};
pub use proxy::RemoteProxy;
pub use relay::{relay, Relay};
pub use value::{BytesKind, Callback, Value};

#[cfg(test)]
mod tests;
